//! Chat command and request parsing.

/// A recognised bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    NewVideo,
    Status(Option<String>),
    Jobs,
    Credits,
    Cancel,
    Unknown(String),
}

/// Parse `/command[@bot] [args]`. Returns `None` for plain text.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;

    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let first_arg = args.split_whitespace().next().map(str::to_string);

    Some(match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "newvideo" => Command::NewVideo,
        "status" => Command::Status(first_arg),
        "jobs" => Command::Jobs,
        "credits" => Command::Credits,
        "cancel" => Command::Cancel,
        _ => Command::Unknown(name),
    })
}

/// Split `"topic, 45"` into the topic and the requested duration.
///
/// Only a trailing comma-separated integer counts as a duration; anything
/// else leaves the whole text as the topic.
pub fn parse_prompt(text: &str) -> (String, Option<u32>) {
    let text = text.trim();
    if let Some((topic, tail)) = text.rsplit_once(',') {
        let tail = tail.trim();
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            // Absurdly long digit strings saturate and get clamped later.
            let secs = tail.parse::<u32>().unwrap_or(u32::MAX);
            return (topic.trim().to_string(), Some(secs));
        }
    }
    (text.to_string(), None)
}
