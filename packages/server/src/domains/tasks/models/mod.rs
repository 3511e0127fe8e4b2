pub mod task;

pub use task::{
    PipelineStage, ProgressDelta, Task, TaskFilter, TaskKind, TaskOptions, TaskPatch,
    TaskProgress, TaskStatus,
};
