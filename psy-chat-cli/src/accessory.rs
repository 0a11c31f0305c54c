use std::time::Instant;

/// Optional add-on driven by chat activity. Every hook defaults to a no-op, so
/// an accessory only implements what it reacts to.
pub trait Accessory: Send {
    /// Called after the user submits a non-empty message.
    fn on_submit(&mut self, _now: Instant) {}

    /// Called for every message authored by the AI.
    fn on_ai_message(&mut self, _text: &str) {}

    /// Called periodically by the UI loop.
    fn on_tick(&mut self, _now: Instant) {}

    /// Handles `/command arg`. Returns feedback for the user when the command
    /// belongs to this accessory, `None` otherwise.
    fn handle_command(&mut self, _command: &str, _arg: &str) -> Option<String> {
        None
    }

    /// One-line state for the status bar.
    fn status(&self) -> Option<String> {
        None
    }
}

/// Splits `/name rest of line` into `("name", "rest of line")`.
pub fn parse_command(input: &str) -> Option<(&str, &str)> {
    let body = input.strip_prefix('/')?;
    let (name, arg) = match body.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (body, ""),
    };
    if name.is_empty() {
        None
    } else {
        Some((name, arg))
    }
}
