use anyhow::{Context, Result};
use chatstream::api::{ChatMessage, Client};
use chatstream::envconfig::{EnvConfig, ReasoningSettings};
use chatstream::prompt::build_request;
use chatstream::session::{ChatSession, CompletedTurn};
use chatstream::smoothing::DiffWriter;
use chatstream::sse;
use chatstream::thinking::{parse_reasoning_from_string, TemplateRegistry};
use std::io::{self, Write};
use std::path::Path;
use std::process;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

pub struct ChatOptions {
    pub system: Option<String>,
    pub model: Option<String>,
    pub template: Option<String>,
    pub stream: bool,
    pub smooth: bool,
}

pub async fn chat(prompt: Vec<String>, options: ChatOptions) -> Result<()> {
    let mut config = EnvConfig::from_env();
    if let Some(model) = options.model {
        config.model = model;
    }
    config.stream &= options.stream;

    let settings = load_settings(&config, options.template.as_deref())?;
    let client = Client::from_config(&config)?;
    let mut session = ChatSession::new(settings, config.smooth && options.smooth);

    let mut history = Vec::new();
    if let Some(system) = options.system {
        history.push(ChatMessage::system(system));
    }

    let interrupts = Interrupts::install();
    let prompt = prompt.join(" ");
    if !prompt.is_empty() {
        turn(&client, &mut session, &config, &interrupts, &mut history, &prompt).await?;
    } else {
        interactive_chat(&client, &mut session, &config, &interrupts, &mut history).await?;
    }

    Ok(())
}

async fn interactive_chat(
    client: &Client,
    session: &mut ChatSession,
    config: &EnvConfig,
    interrupts: &Interrupts,
    history: &mut Vec<ChatMessage>,
) -> Result<()> {
    println!(">>> Chatting with {} (reasoning template: {})", config.model, session.template().name);
    println!("Type /help for commands, /exit to quit, Ctrl-C stops a reply or exits");

    loop {
        print!("\n>>> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            if handle_command(session, history, line)? {
                break;
            }
            continue;
        }

        if let Err(e) = turn(client, session, config, interrupts, history, line).await {
            eprintln!("Error: {:#}", e);
        }
    }
    Ok(())
}

fn handle_command(session: &mut ChatSession, history: &mut Vec<ChatMessage>, cmd: &str) -> Result<bool> {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(false);
    }

    match parts[0] {
        "/help" | "/?" => {
            println!("Commands:");
            println!("  /exit, /quit         Exit the chat");
            println!("  /clear               Forget the conversation so far");
            println!("  /template [name]     Show or switch the reasoning template");
            println!("  /reasoning           Show the reasoning of the last reply");
            println!("  /?                   Show this help");
        }
        "/exit" | "/quit" => return Ok(true),
        "/clear" => {
            history.retain(|m| m.role == "system");
            println!("Conversation cleared");
        }
        "/template" => match parts.get(1) {
            None => print_templates(session.template().name.as_str()),
            Some(name) => {
                let mut settings = session.settings().clone();
                match settings.select_template(name) {
                    Ok(()) => {
                        println!("Using reasoning template {}", settings.template.name);
                        session.set_template(settings.template);
                    }
                    Err(e) => println!("{}", e),
                }
            }
        },
        "/reasoning" => {
            let last = history
                .iter()
                .rev()
                .find(|m| m.role == "assistant")
                .and_then(|m| m.reasoning.as_deref());
            println!("{}", last.unwrap_or("No reasoning recorded"));
        }
        _ => {
            println!("Unknown command: {}", parts[0]);
            println!("Type /help for available commands");
        }
    }
    Ok(false)
}

/// Runs one exchange. The user message is only kept in the history when a
/// reply came back.
async fn turn(
    client: &Client,
    session: &mut ChatSession,
    config: &EnvConfig,
    interrupts: &Interrupts,
    history: &mut Vec<ChatMessage>,
    text: &str,
) -> Result<()> {
    history.push(ChatMessage::user(text));
    let request = build_request(history, config, session.settings());

    interrupts.arm(session.abort_handle());
    let mut out = DiffWriter::new(io::stdout());
    let result = client.chat(session, &request, &mut out).await;
    interrupts.disarm();
    println!();
    session.reset_abort();

    match result {
        Ok(turn) => {
            report(&turn);
            history.push(ChatMessage::assistant(turn.content, Some(turn.reasoning)));
            Ok(())
        }
        Err(e) => {
            history.pop();
            Err(e)
        }
    }
}

pub async fn replay(file: &Path, template: Option<&str>, smooth: bool) -> Result<()> {
    let config = EnvConfig::from_env();
    let settings = load_settings(&config, template)?;
    let session = ChatSession::new(settings, smooth);

    let body = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;

    let interrupts = Interrupts::install();
    interrupts.arm(session.abort_handle());
    let mut out = DiffWriter::new(io::stdout());
    let result = session.stream(sse::decode(ReaderStream::new(body)), &mut out).await;
    interrupts.disarm();
    println!();

    report(&result?);
    Ok(())
}

pub fn parse(text: &str, strict: bool, template: Option<&str>) -> Result<()> {
    let settings = load_settings(&EnvConfig::from_env(), template)?;
    let block = parse_reasoning_from_string(text, strict, &settings.template);
    println!("{}", serde_json::to_string_pretty(&block)?);
    Ok(())
}

pub fn templates() -> Result<()> {
    let settings = load_settings(&EnvConfig::from_env(), None)?;
    print_templates(&settings.template.name);
    Ok(())
}

fn print_templates(active: &str) {
    println!("{:<3}{:<12} {:<16} {:<16} SEPARATOR", "", "NAME", "PREFIX", "SUFFIX");
    for template in TemplateRegistry::builtin().iter() {
        let marker = if template.name == active { "*" } else { "" };
        println!(
            "{:<3}{:<12} {:<16} {:<16} {:?}",
            marker,
            template.name,
            format!("{:?}", template.prefix),
            format!("{:?}", template.suffix),
            template.separator
        );
    }
}

fn load_settings(config: &EnvConfig, template: Option<&str>) -> Result<ReasoningSettings> {
    let mut settings = config.reasoning_settings()?;
    if let Some(name) = template {
        settings.select_template(name)?;
    }
    Ok(settings)
}

/// Routes Ctrl-C for the life of the command. Once a handler is installed
/// the default SIGINT exit is gone, so with no reply running the watcher
/// exits itself.
struct Interrupts {
    active: watch::Sender<Option<CancellationToken>>,
    watcher: Option<JoinHandle<()>>,
}

impl Interrupts {
    fn new() -> Self {
        let (active, _) = watch::channel(None);
        Self { active, watcher: None }
    }

    fn install() -> Self {
        let mut interrupts = Self::new();
        let active = interrupts.active.subscribe();
        interrupts.watcher = Some(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !cancel_active(&active) {
                    println!();
                    process::exit(130);
                }
                tracing::debug!("reply interrupted");
            }
        }));
        interrupts
    }

    /// Ctrl-C cancels `cancel` until [`Interrupts::disarm`].
    fn arm(&self, cancel: CancellationToken) {
        self.active.send_replace(Some(cancel));
    }

    fn disarm(&self) {
        self.active.send_replace(None);
    }
}

impl Drop for Interrupts {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

fn cancel_active(active: &watch::Receiver<Option<CancellationToken>>) -> bool {
    let current = active.borrow().clone();
    match current {
        Some(cancel) => {
            cancel.cancel();
            true
        }
        None => false,
    }
}

fn report(turn: &CompletedTurn) {
    if turn.aborted {
        eprintln!("[stopped]");
    }
    tracing::info!(
        reasoning_chars = turn.reasoning.chars().count(),
        content_chars = turn.content.chars().count(),
        chunks = turn.chunks,
        skipped = turn.skipped,
        "reply complete"
    );
}
