//! Shared log utility for transport events

use std::fmt::{self, Display, Write};

use tracing::info;

/// Key/value pairs attached to a log line
pub type LogContext<'a> = &'a [(&'a str, &'a dyn Display)];

/// Log `message` with optional structured context, recorded as the
/// `context` field of the event
pub fn log(message: &str, context: Option<LogContext<'_>>) {
    match context {
        Some(context) if !context.is_empty() => {
            info!(context = %ContextFields(context), "{}", message);
        }
        _ => info!("{}", message),
    }
}

struct ContextFields<'a>(LogContext<'a>);

impl Display for ContextFields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_char(' ')?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}
