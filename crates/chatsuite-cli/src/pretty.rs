//! Terminal output for chats, transcripts and users.

use chatsuite_core::models::{Chat, Message, MessageRole, Profile};
use chatsuite_core::parts::Part;
use chrono::{DateTime, Utc};
use console::{Style, Term, style};

/// Longest tool payload shown inline.
const MAX_PAYLOAD_CHARS: usize = 160;

/// Terminal width for formatting, with fallback.
fn term_width() -> usize {
    usize::from(Term::stdout().size().1).clamp(40, 100)
}

/// Format a relative time string (e.g., "2 days ago", "just now").
fn relative_time(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(dt);

    if duration.num_seconds() < 60 {
        return "just now".to_string();
    }
    if duration.num_minutes() < 60 {
        let mins = duration.num_minutes();
        return format!("{mins} min{s} ago", s = if mins == 1 { "" } else { "s" });
    }
    if duration.num_hours() < 24 {
        let hours = duration.num_hours();
        return format!("{hours} hour{s} ago", s = if hours == 1 { "" } else { "s" });
    }
    if duration.num_days() < 7 {
        let days = duration.num_days();
        return format!("{days} day{s} ago", s = if days == 1 { "" } else { "s" });
    }

    dt.format("%Y-%m-%d").to_string()
}

fn role_style(role: MessageRole) -> Style {
    match role {
        MessageRole::User => Style::new().cyan().bold(),
        MessageRole::Assistant => Style::new().green().bold(),
        MessageRole::System => Style::new().magenta().bold(),
        MessageRole::Tool => Style::new().yellow().bold(),
        MessageRole::Other => Style::new().white(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let head: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

/// One display line (or block) per part.
fn render_part(part: &Part) -> String {
    match part {
        Part::Text { text } => text.trim().to_string(),
        Part::ToolCall {
            tool_name, args, ..
        } => format!("[call {tool_name}] {}", truncate(&args.to_string(), MAX_PAYLOAD_CHARS)),
        Part::ToolResult {
            tool_name, result, ..
        } => format!(
            "[result {tool_name}] {}",
            truncate(&result.to_string(), MAX_PAYLOAD_CHARS)
        ),
    }
}

fn wrap(text: &str, indent: usize) -> String {
    let width = term_width().saturating_sub(indent);
    let prefix = " ".repeat(indent);
    text.lines()
        .flat_map(|line| {
            if line.trim().is_empty() {
                vec![String::new()]
            } else {
                textwrap::wrap(line, width)
                    .into_iter()
                    .map(|cow| format!("{prefix}{cow}"))
                    .collect()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn print_chats(chats: &[Chat]) {
    if chats.is_empty() {
        println!("{}", style("No chats found.").dim());
        return;
    }

    let now = Utc::now();
    for chat in chats {
        println!(
            "{}  {}  {}",
            style(&chat.id).dim(),
            style(format!("{:>12}", relative_time(chat.created_at, now))).italic(),
            style(truncate(&chat.title, 60)).bold()
        );
    }
}

pub fn print_transcript(chat: &Chat, messages: &[Message]) {
    let separator = "─".repeat(term_width());

    println!("{}", style(&chat.title).bold().white());
    println!(
        "{}",
        style(format!(
            "{} | owner {} | {}",
            chat.id,
            chat.user_id,
            chat.created_at.format("%Y-%m-%d %H:%M")
        ))
        .dim()
    );
    println!("{}", style(&separator).dim());

    if messages.is_empty() {
        println!("{}", style("No messages.").dim());
        return;
    }

    for message in messages {
        let role = message.role.to_string();
        println!(
            "{} {}",
            role_style(message.role).apply_to(role),
            style(message.created_at.format("%H:%M:%S")).dim()
        );
        for part in message.content.parts() {
            let rendered = render_part(&part);
            if !rendered.is_empty() {
                println!("{}", wrap(&rendered, 2));
            }
        }
        println!();
    }
}

pub fn print_profiles(profiles: &[Profile]) {
    if profiles.is_empty() {
        println!("{}", style("No users found.").dim());
        return;
    }

    let now = Utc::now();
    for profile in profiles {
        println!(
            "{}  {:>6} credits  {}  {}",
            profile.id,
            profile.credits,
            style(profile.email.as_deref().unwrap_or("-")).cyan(),
            style(relative_time(profile.created_at, now)).dim()
        );
    }
}
