pub mod coordinator;
pub mod dispatcher;

pub use self::{
    coordinator::{Actuation, IngestReport, IngestionCoordinator, PipelineState, ProcessedReading},
    dispatcher::Dispatcher,
};
