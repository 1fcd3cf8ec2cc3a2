//! Bounce Counter
//!
//! This crate counts jumps in a video stream. Each frame is run through an object
//! detector, the vertical motion of the best detection is tracked, and a counter
//! is incremented every time a full rise-then-fall is observed.
//!
//! # Architecture
//!
//! The core is a bounded frame pipeline:
//!
//! 1. **Ingest**: Reads frames from a source at a paced rate.
//! 2. **Detection**: Runs the detector, updates the jump state machine, draws overlays.
//! 3. **Fan-out**: Display (controller thread) and, for recorded media, a writer.
//!
//! Stages run on their own threads and are joined by fixed-capacity channels, so a
//! slow consumer stalls its producer instead of growing memory. A single shutdown
//! signal stops every stage; end-of-stream markers carry a finished source through
//! the pipeline so sinks can flush.
//!
//! # Module Structure
//!
//! - `pipeline`: Controller (`Pipeline::scan`), stage threads, bounded joins
//! - `channel`: Bounded frame channel with shutdown-aware blocking
//! - `ingest`: Frame sources (synthetic, image sequence, video file) and the ingest stage
//! - `detect`: Detector backends, registry, best-detection selection, detection stage
//! - `jump`: Jump state machine and shared counter
//! - `annotate`: Overlays (counter, fps, model label, box, trail)
//! - `sink`: Display, writer and low-confidence archive
//! - `config`: `ScanConfig` (TOML file + environment)
//! - `report`: `RunReport` and completion notification
//! - `ui`: Terminal progress display

pub mod annotate;
pub mod channel;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod jump;
pub mod pipeline;
pub mod report;
pub mod shutdown;
pub mod sink;
pub mod ui;

pub use channel::{frame_channel, FrameReceiver, FrameSender, Received, SendOutcome};
pub use config::ScanConfig;
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend, DetectorProfile};
pub use frame::{Frame, FramePacket};
pub use ingest::{open_source, FrameSource, SourceUnavailable};
pub use jump::{JumpCounter, JumpDetector, JumpEvent, JumpState};
pub use pipeline::{Collaborators, Pipeline};
pub use report::{Completion, RunReport, StopReason, TaskOutcome};
pub use shutdown::ShutdownSignal;
pub use sink::{DisplaySink, FrameWriter, LowConfidenceArchiver, WriterFactory, WriterTarget};
