pub mod aggregate;
pub mod line_framer;
pub mod normalize;
pub mod sse;
pub mod synthesizer;
pub mod translate;

pub use aggregate::{AggregateSnapshot, AggregationState};
pub use line_framer::{line_stream, LineFramer, TrailingFragmentPolicy};
pub use synthesizer::OutboundEnvelope;
pub use translate::{translate_non_streaming, translate_streaming, TranslateOptions};
