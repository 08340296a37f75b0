pub mod batch;
pub mod clock;
pub mod config;
pub mod encoder;
pub mod error;
pub mod locks;
pub mod schedule;
pub mod supervisor;

pub use batch::validator::{DriveLinkValidator, MediaFileValidator, SourceValidator};
pub use batch::{
    parse_sources, validate_sources, BatchError, BatchQueue, BatchReport, BatchResult,
    ItemProcessor, ItemStatus, ProgressHandle, QueueItem, ValidationReport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    load_config, AircastConfig, BatchSection, EncoderSection, PrematureExitPolicy,
    SchedulerSection, SupervisorSection,
};
pub use encoder::{stream_args, StreamRequest};
pub use error::{ConfigError, Result};
pub use locks::{SaveConflict, SaveLockGuard, SaveLockSet};
pub use schedule::{
    BroadcastLauncher, BroadcastTemplate, Misfire, RecurrenceError, RecurrencePattern,
    RecurrenceResult, RecurrenceRule, ScheduleSynchronizer, SweepOutcome, SynchronizerError,
    SynchronizerResult, TemplateStore,
};
pub use supervisor::process::{ProcessSpawner, StreamHandle, TokioProcessSpawner};
pub use supervisor::registry::StreamRegistry;
pub use supervisor::{
    PollReport, StopReason, StreamEvent, StreamRecord, StreamStatus, StreamSupervisor,
    SupervisorError, SupervisorResult, ENDING_SOON_THRESHOLD_MS,
};
