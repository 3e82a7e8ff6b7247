/// Interactive driver: reads commands from stdin, runs one generation at a
/// time on a spawned task, and feeds the result back through a channel.
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::actions::UserAction;
use crate::client::{GeneratedUi, Generator};
use crate::document::Document;
use crate::error::{FailureKind, GenerationError, Rejection, SessionError};
use crate::render::Renderer;
use crate::session::{Completion, GenerationRequest, Session, SessionState, Ticket};
use crate::timeline::{Preview, TimelineEntry};
use crate::versions::SnapshotId;

// ── AppEvent: results from the generation task ──────────────────────────────

#[derive(Debug)]
pub enum AppEvent {
    Generated {
        ticket: Ticket,
        outcome: Result<GeneratedUi, GenerationError>,
    },
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Plain text: refine if there is context, otherwise start fresh
    Prompt(String),
    New(String),
    Refine(String),
    Timeline,
    Preview(u64),
    Close,
    Restore(u64),
    Show,
    Reset,
    Action(String),
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// Parse one input line. Blank lines yield None.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Prompt(line.to_string()));
        }
        let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let id = || rest.parse::<u64>().ok();
        Some(match cmd {
            "/new" => Command::New(rest.to_string()),
            "/refine" => Command::Refine(rest.to_string()),
            "/timeline" | "/history" => Command::Timeline,
            "/preview" => match id() {
                Some(n) => Command::Preview(n),
                None => Command::Unknown(line.to_string()),
            },
            "/close" => Command::Close,
            "/restore" => match id() {
                Some(n) => Command::Restore(n),
                None => Command::Unknown(line.to_string()),
            },
            "/show" => Command::Show,
            "/reset" | "/startover" => Command::Reset,
            "/action" => Command::Action(rest.to_string()),
            "/help" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        })
    }
}

const HELP: &str = "Commands: <text> refine (or start)  /new <prompt>  /refine <prompt>  /timeline  /preview <id>  /close  /restore <id>  /show  /action <name> k=v…  /reset  /quit";

// ── App ───────────────────────────────────────────────────────────────────────

pub struct App {
    pub session: Session,
    generator: Arc<dyn Generator>,
    renderer: Box<dyn Renderer>,
    /// Open read-only overlays, most recent last
    pub previews: Vec<Preview>,
    enable_actions: bool,
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        generator: Arc<dyn Generator>,
        renderer: Box<dyn Renderer>,
        enable_actions: bool,
    ) -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Self {
            session: Session::new(),
            generator,
            renderer,
            previews: Vec::new(),
            enable_actions,
            tx,
        };
        (app, rx)
    }

    /// Returns false when the user asked to quit.
    pub fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Prompt(text) => {
                let refine = self.session.has_context();
                let submitted = self.session.submit(&text, refine);
                self.launch(submitted);
            }
            Command::New(text) => {
                let submitted = self.session.submit(&text, false);
                self.launch(submitted);
            }
            Command::Refine(text) => {
                let submitted = self.session.submit(&text, true);
                self.launch(submitted);
            }
            Command::Action(args) => {
                if !self.enable_actions {
                    println!("  actions are disabled for this profile");
                    return true;
                }
                match UserAction::parse(&args) {
                    Some(action) => {
                        let submitted = self.session.submit_action(&action);
                        self.launch(submitted);
                    }
                    None => println!("  usage: /action <name> key=value …"),
                }
            }
            Command::Timeline => self.print_timeline(),
            Command::Preview(n) => match self.session.preview(SnapshotId::new(n)) {
                Ok(preview) => {
                    let snap = preview.snapshot();
                    println!("  ◇ preview {}  ·  {}", snap.id(), snap.prompt());
                    println!("{}", snap.document().to_pretty_json());
                    self.previews.push(preview);
                }
                Err(e) => println!("  ✗ {e}"),
            },
            Command::Close => match self.previews.pop() {
                Some(p) => println!("  closed preview {}", p.id()),
                None => println!("  no preview open"),
            },
            Command::Restore(n) => match self.session.restore(SnapshotId::new(n)) {
                Ok(snapshot) => {
                    self.previews.clear();
                    println!("  ↺ restored snapshot {}", snapshot.id());
                    self.present(snapshot.id(), snapshot.document());
                }
                Err(SessionError::Rejected(r)) => log::debug!("restore ignored: {r}"),
                Err(e) => println!("  ✗ {e}"),
            },
            Command::Show => match (self.session.active_snapshot(), self.session.current_document()) {
                (Some(snapshot), Some(doc)) => {
                    println!("  ◆ {}", snapshot.prompt());
                    self.present(snapshot.id(), &doc);
                }
                _ => println!("  {}", self.status_line()),
            },
            Command::Reset => match self.session.reset() {
                Ok(()) => {
                    self.previews.clear();
                    println!("  session cleared");
                }
                Err(r) => log::debug!("reset ignored: {r}"),
            },
            Command::Help => println!("  {HELP}"),
            Command::Quit => return false,
            Command::Unknown(text) => println!("  unknown command: {text}  (try /help)"),
        }
        true
    }

    /// Hand a document to the renderer. A render failure is reported but never
    /// ends the session; the snapshot is already committed.
    fn present(&mut self, id: SnapshotId, document: &Document) {
        if let Err(e) = self.renderer.render(id, document) {
            log::warn!("render of snapshot {id} failed: {e:#}");
            println!("  ✗ could not render snapshot {id}: {e:#}");
        }
    }

    /// One-line description of the live position: what is generating, what
    /// failed, or what is on screen.
    fn status_line(&self) -> String {
        let prompt = self.session.last_prompt().unwrap_or_default();
        match (self.session.state(), self.session.last_error()) {
            (_, Some(e)) => format!("\"{prompt}\" failed: {e}"),
            (SessionState::Generating { .. }, _) => format!("generating \"{prompt}\"…"),
            (SessionState::Displaying { snapshot }, _) => format!("showing {snapshot}: {prompt}"),
            _ => "nothing generated yet".to_string(),
        }
    }

    /// Spawn the generator call for an accepted submission. Rejections are
    /// dropped silently.
    fn launch(&mut self, submitted: std::result::Result<GenerationRequest, Rejection>) {
        let request = match submitted {
            Ok(r) => r,
            Err(r) => {
                log::debug!("submission ignored: {r}");
                return;
            }
        };
        let kind = if request.refine { "refinement" } else { "fresh" };
        log::debug!("launching {kind} round, {} context turns", request.history.len());
        println!("  ⟳ generating your UI…");

        let generator = Arc::clone(&self.generator);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = generator.generate(&request.prompt, &request.history).await;
            let _ = tx.send(AppEvent::Generated { ticket: request.ticket, outcome });
        });
    }

    pub fn apply_event(&mut self, ev: AppEvent) {
        match ev {
            AppEvent::Generated { ticket, outcome } => match self.session.complete(ticket, outcome) {
                Completion::Displayed(snapshot) => {
                    println!(
                        "  ✓ snapshot {}  ·  {} round(s) in context",
                        snapshot.id(),
                        self.session.turn_log().rounds()
                    );
                    self.present(snapshot.id(), snapshot.document());
                }
                Completion::Failed(e) => {
                    println!("  ✗ {e}");
                    println!("  {}", failure_hint(&e));
                }
                Completion::Stale => {}
            },
        }
    }

    fn print_timeline(&self) {
        println!();
        let versions = self.session.versions();
        if versions.is_empty() {
            println!("  no snapshots yet");
        } else {
            println!("  {} snapshot(s)", versions.len());
        }
        for entry in self.session.timeline() {
            match entry {
                TimelineEntry::Snapshot { id, prompt, created_at, active } => {
                    let marker = if active { "●" } else { "○" };
                    println!("  {marker} {id:>3}  {}  {prompt}", created_at.format("%H:%M:%S"));
                }
                TimelineEntry::LiveEdge => println!("  ┆      {}", self.status_line()),
            }
        }
        println!();
    }
}

/// What the user can do next, worded by failure category.
fn failure_hint(error: &GenerationError) -> &'static str {
    match error.kind() {
        FailureKind::Transport => "generator unreachable: check the endpoint, then resubmit",
        FailureKind::Upstream => "generator rejected the request: rephrase and resubmit, /restore <id>, or /reset",
        FailureKind::EmptyResult => "no UI came back: try a more specific prompt, /restore <id>, or /reset",
    }
}

// ── Event loop ────────────────────────────────────────────────────────────────

pub async fn run(mut app: App, mut rx: mpsc::UnboundedReceiver<AppEvent>) -> Result<()> {
    println!("  {HELP}");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line? {
                    Some(line) => {
                        if let Some(cmd) = Command::parse(&line) {
                            if !app.handle_command(cmd) {
                                break;
                            }
                        }
                    }
                    // stdin closed: let an in-flight round finish, then exit
                    None => {
                        input_open = false;
                        if !app.session.is_generating() {
                            break;
                        }
                    }
                }
            }
            Some(ev) = rx.recv() => {
                app.apply_event(ev);
                if !input_open && !app.session.is_generating() {
                    break;
                }
            }
        }
    }
    Ok(())
}
