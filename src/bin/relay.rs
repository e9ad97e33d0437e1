use anyhow::Result;
use crossterm::style::Stylize;
use relaycoder::config::Config;
use relaycoder::error::turn_error;
use relaycoder::history::render_turn;
use relaycoder::state::{ConversationManager, ConversationUpdate, TurnPhase};
use relaycoder::store::JsonFileStore;
use relaycoder::types::Conversation;
use std::io::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EXIT_COMMANDS: [&str; 2] = ["/exit", "/quit"];

/// Prints the rendered transcript of one turn as it grows.
///
/// The last two rendered lines can still change while a message streams
/// (a partial argument line and its closing fence), so they are held back
/// until the message is complete.
struct TranscriptPrinter {
    start_index: usize,
    rendered: String,
    printed: String,
}

impl TranscriptPrinter {
    fn new(start_index: usize) -> Self {
        Self {
            start_index,
            rendered: String::new(),
            printed: String::new(),
        }
    }

    fn apply(&mut self, update: ConversationUpdate) {
        match update {
            ConversationUpdate::Snapshot(conversation) => {
                self.rendered = render_turn(&conversation.messages, self.start_index);
                let stable = stable_prefix(&self.rendered).to_string();
                self.print_up_to(&stable);
            }
            ConversationUpdate::Phase(phase) => match phase {
                TurnPhase::DetectedToolCall | TurnPhase::Done => {
                    let rendered = self.rendered.clone();
                    self.print_up_to(&rendered);
                }
                TurnPhase::ExecutingTool => status_line("running tool"),
                _ => {}
            },
            ConversationUpdate::TurnComplete => {
                let rendered = self.rendered.clone();
                self.print_up_to(&rendered);
            }
            ConversationUpdate::TurnFailed(message) => {
                println!("{}", format!("turn failed: {message}").red());
            }
        }
    }

    fn print_up_to(&mut self, text: &str) {
        let Some(suffix) = text.strip_prefix(self.printed.as_str()) else {
            return;
        };
        if suffix.is_empty() {
            return;
        }
        print!("{suffix}");
        let _ = std::io::stdout().flush();
        self.printed = text.to_string();
    }
}

fn stable_prefix(rendered: &str) -> &str {
    let mut end = rendered.len();
    for _ in 0..2 {
        end = rendered[..end.saturating_sub(1)]
            .rfind('\n')
            .map_or(0, |index| index + 1);
    }
    &rendered[..end]
}

fn status_line(text: &str) {
    println!("{}", format!("· {text}").dark_grey());
}

fn new_conversation(config: &Config) -> Result<Conversation> {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    let conversation = Conversation::new(
        format!("conv-{millis}"),
        config.model.clone(),
        config.system_prompt.clone(),
        config.temperature,
    );
    Ok(if config.code_interpreter {
        conversation.with_code_interpreter()
    } else {
        conversation
    })
}

async fn run_turn(manager: &mut ConversationManager, input: String) {
    let cancel = CancellationToken::new();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let mut printer = TranscriptPrinter::new(manager.conversation().messages.len());

    let result = {
        let turn = manager.send_message(input, Some(&update_tx), &cancel);
        tokio::pin!(turn);
        loop {
            tokio::select! {
                result = &mut turn => break result,
                Some(update) = update_rx.recv() => printer.apply(update),
                _ = tokio::signal::ctrl_c() => {
                    if !cancel.is_cancelled() {
                        status_line("cancelling");
                        cancel.cancel();
                    }
                }
            }
        }
    };

    drop(update_tx);
    while let Some(update) = update_rx.recv().await {
        printer.apply(update);
    }

    match result {
        Ok(outcome) if outcome.tool_rounds > 0 => {
            status_line(&format!("{} tool round(s)", outcome.tool_rounds));
        }
        Ok(_) => {}
        Err(error) if turn_error(&error).is_some_and(|e| e.is_cancelled()) => {
            status_line("turn cancelled");
        }
        Err(_) => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let store = Arc::new(JsonFileStore::new(config.store_dir.clone()));
    let conversation = match std::env::args().nth(1) {
        Some(id) => match store.load(&id)? {
            Some(conversation) => conversation,
            None => anyhow::bail!("No saved conversation '{id}' in {}", store.dir().display()),
        },
        None => new_conversation(&config)?,
    };
    let conversation_id = conversation.id.clone();
    let mut manager = ConversationManager::new(&config, conversation, store)?;

    println!(
        "{} {}",
        "relay".bold(),
        format!("{} · {conversation_id}", config.model).dark_grey()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".green().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&input) {
            break;
        }
        run_turn(&mut manager, input.to_string()).await;
    }

    Ok(())
}
