use crate::TributaryError;
use crate::types::InboundRecord;

/// Receives every error-free record a consume loop polls, one at a time and in
/// poll order. An `Err` stops the current drain and reaches the loop's caller.
pub trait MessageHandler: Send {
    fn handle(&mut self, record: InboundRecord) -> Result<(), TributaryError>;
}

impl<F> MessageHandler for F
where
    F: FnMut(InboundRecord) -> Result<(), TributaryError> + Send,
{
    fn handle(&mut self, record: InboundRecord) -> Result<(), TributaryError> {
        self(record)
    }
}
