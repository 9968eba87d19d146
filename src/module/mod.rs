// file: src/module/mod.rs
// description: module contract, ports, and the built-in module set

pub mod contract;
pub mod port;
pub mod processing;
pub mod reading;
pub mod writing;

pub use contract::{ModuleContext, ModuleKind, PipelineModule, TagRequirement};
pub use port::{InputPort, OutputPort};
pub use processing::{BackgroundSubtraction, FrameSelection, StackAverage};
pub use reading::{CubeSidecar, RawCubeReader, SyntheticStackReader};
pub use writing::RawCubeWriter;
