#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptCommand {
    Full,
    Updates,
    LastN(usize),
    None,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New,
    Cancel,
    Quit,
    Transcript(TranscriptCommand),
    Sessions,
    Load(String),
    Delete(String),
    Export,
    Show(usize),
    Usage(String),
    Unknown(String),
}

pub const HELP_TEXT: &str = "Commands: /help, /new, /cancel, /quit, /transcript full|updates|last N|none|status, /sessions, /load <id>, /delete <id>, /export, /show <n>";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let command = words.next().unwrap_or(trimmed).to_string();
    let args: Vec<&str> = words.collect();

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/new" | "/clear" => SlashCommand::New,
        "/cancel" => SlashCommand::Cancel,
        "/quit" | "/exit" => SlashCommand::Quit,
        "/transcript" => parse_transcript_args(&args),
        "/sessions" => SlashCommand::Sessions,
        "/load" => match args.as_slice() {
            [id] => SlashCommand::Load((*id).to_string()),
            _ => SlashCommand::Usage("/load <id>".to_string()),
        },
        "/delete" => match args.as_slice() {
            [id] => SlashCommand::Delete((*id).to_string()),
            _ => SlashCommand::Usage("/delete <id>".to_string()),
        },
        "/export" | "/save" => SlashCommand::Export,
        "/show" => match args.as_slice() {
            [n] => match n.parse::<usize>() {
                Ok(n) if n > 0 => SlashCommand::Show(n),
                _ => SlashCommand::Usage("/show <n>".to_string()),
            },
            _ => SlashCommand::Usage("/show <n>".to_string()),
        },
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}

fn parse_transcript_args(args: &[&str]) -> SlashCommand {
    let usage = || SlashCommand::Usage("/transcript full|updates|last N|none|status".to_string());
    let command = match args {
        [] | ["status"] => TranscriptCommand::Status,
        ["full"] => TranscriptCommand::Full,
        ["updates"] => TranscriptCommand::Updates,
        ["none"] | ["skip"] => TranscriptCommand::None,
        ["last", n] => match n.parse::<usize>() {
            Ok(n) if n > 0 => TranscriptCommand::LastN(n),
            _ => return usage(),
        },
        _ => return usage(),
    };

    SlashCommand::Transcript(command)
}
