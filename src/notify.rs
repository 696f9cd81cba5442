use std::sync::Arc;

/// User-facing toast surface.
pub trait Notifier: Send + Sync {
    /// Shows a success message.
    fn success(&self, message: &str);

    /// Shows an error message.
    fn error(&self, message: &str);
}

/// No-op notifier implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNotifier;

impl Notifier for NoNotifier {
    fn success(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}

impl<N> Notifier for Arc<N>
where
    N: Notifier + ?Sized,
{
    fn success(&self, message: &str) {
        (**self).success(message);
    }

    fn error(&self, message: &str) {
        (**self).error(message);
    }
}
