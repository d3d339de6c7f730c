use crate::message::Message;

/// Boxed error returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Processes one message delivered by the bus.
///
/// Returning `Err` means "not processed": the worker nacks and the message is
/// delivered again. Handlers must therefore be idempotent.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self(message)
    }
}
