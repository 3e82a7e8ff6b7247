mod actions;
mod app;
mod client;
mod config;
mod document;
mod error;
mod prompt;
mod render;
mod session;
mod timeline;
mod turns;
mod versions;

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{CommandFactory, Parser};
use config::{ConfigFile, Overrides, Protocol, ResolvedConfig};
use render::{FileRenderer, Renderer, StdoutRenderer};
use session::{Completion, Session};

#[derive(Parser, Debug)]
#[command(
    name = "uiloom",
    about = "Generate and refine declarative UIs from natural-language prompts",
    long_about = None,
)]
struct Args {
    /// Prompt to generate once and exit (omit for interactive mode)
    prompt: Option<String>,

    /// Profile to use from config file
    #[arg(short, long, env = "UILOOM_PROFILE")]
    profile: Option<String>,

    /// Override endpoint URL
    #[arg(long, env = "UILOOM_ENDPOINT")]
    endpoint: Option<String>,

    /// Override model name
    #[arg(short, long, env = "UILOOM_MODEL")]
    model: Option<String>,

    /// Override API key
    #[arg(long, env = "UILOOM_API_KEY")]
    api_key: Option<String>,

    /// Override the endpoint protocol
    #[arg(long, value_enum)]
    protocol: Option<Protocol>,

    /// Write the active document to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Write a default config file to ~/.config/uiloom/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: uiloom");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(
        &file,
        &Overrides {
            profile: args.profile.as_deref(),
            endpoint: args.endpoint.as_deref(),
            model: args.model.as_deref(),
            api_key: args.api_key.as_deref(),
            protocol: args.protocol,
        },
    );
    log::debug!(
        "profile {} · {:?} · {} · {}",
        resolved.profile_name,
        resolved.protocol,
        resolved.endpoint,
        resolved.model
    );

    let generator = client::build_generator(&resolved)?;
    let renderer: Box<dyn Renderer> = match args.out {
        Some(path) => Box::new(FileRenderer::new(path)),
        None => Box::new(StdoutRenderer::new()),
    };

    println!();
    println!("  ▲ uiloom  {}  ·  {}", resolved.profile_name, resolved.model);
    println!();

    // ── Single-shot mode ──────────────────────────────────────────────────────
    if let Some(prompt) = args.prompt {
        return run_single_shot(&prompt, generator.as_ref(), renderer).await;
    }

    // ── Interactive mode ──────────────────────────────────────────────────────
    let (app, rx) = app::App::new(generator, renderer, resolved.enable_actions);
    app::run(app, rx).await
}

async fn run_single_shot(
    prompt: &str,
    generator: &dyn client::Generator,
    mut renderer: Box<dyn Renderer>,
) -> Result<()> {
    println!("  ⟳ generating your UI…");
    let mut session = Session::new();
    match session.generate(generator, prompt, false).await? {
        Completion::Displayed(snapshot) => renderer.render(snapshot.id(), snapshot.document()),
        Completion::Failed(e) => bail!("generation failed: {e}"),
        Completion::Stale => bail!("generation result was discarded"),
    }
}

// ── Profiles listing ──────────────────────────────────────────────────────────

fn print_profiles(file: &ConfigFile) {
    let mut entries: Vec<(&String, &config::Profile)> = file.profiles.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    println!();
    println!("  Profiles");
    for (name, p) in entries {
        let marker = if *name == file.default_profile { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    endpoint  {}", p.endpoint);
        println!("    model     {}", p.model);
        println!("    protocol  {:?}", p.protocol);
        println!();
    }
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "elvish" => Shell::Elvish,
        _ => bail!("Unknown shell: {shell_name} (supported: bash, zsh, fish, elvish)"),
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "uiloom", &mut std::io::stdout());
    Ok(())
}
