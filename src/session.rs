//! Interactive session: the event loop tying everything together.
//!
//! One loop owns the state machine and is the only code that touches it, so
//! inbound messages and user actions are applied one at a time in the order
//! they are observed. Rendering runs on its own task behind an ordered queue.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::channel::{ChannelEvent, SessionChannel};
use crate::config::Config;
use crate::error::Result;
use crate::export::{now_ms, write_transcript, ExportPolicy, Transcript};
use crate::game::GameStateMachine;
use crate::protocol::{ChoiceIndex, OutboundMessage, Role};
use crate::render::{self, RenderCommand, Renderer};

/// A line of user input, interpreted for the session's role.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Submit(String),
    Choose(ChoiceIndex),
    Restart,
    Quit,
    /// Nothing to do (blank line).
    Nothing,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str, role: Role) -> Command {
        let trimmed = line.trim();
        match trimmed {
            "" => Command::Nothing,
            "/restart" | "/reset" => Command::Restart,
            "/quit" | "/exit" => Command::Quit,
            _ if trimmed.starts_with('/') => Command::Unknown(trimmed.to_string()),
            _ => match role {
                Role::Asker => Command::Submit(line.to_string()),
                Role::Chooser => match trimmed.parse::<ChoiceIndex>() {
                    Ok(index) => Command::Choose(index),
                    Err(_) => Command::Unknown(trimmed.to_string()),
                },
            },
        }
    }
}

/// Whether a yes/no answer means yes.
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Outcome of applying one command to the game.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Send(OutboundMessage),
    /// Restart requested; the transcript (if any) is offered for export first.
    Restart(Option<Transcript>),
    Quit,
    Ignore,
}

/// Apply a user command to the state machine. Rejected actions are ignored
/// locally; nothing is sent for them.
pub fn apply_command(game: &mut GameStateMachine, cmd: Command) -> Step {
    match cmd {
        Command::Submit(prompt) => game.submit(&prompt).map_or(Step::Ignore, Step::Send),
        Command::Choose(index) => game.choose(index).map_or(Step::Ignore, Step::Send),
        Command::Restart => Step::Restart(game.transcript(now_ms())),
        Command::Quit => Step::Quit,
        Command::Nothing => Step::Ignore,
        Command::Unknown(text) => {
            tracing::debug!(input = %text, "unrecognised input");
            Step::Ignore
        }
    }
}

/// Whether to save the transcript under `policy`. `answer` is the user's
/// reply when the policy asks; no reply means no.
pub fn should_export(policy: ExportPolicy, answer: Option<&str>) -> bool {
    match policy {
        ExportPolicy::Always => true,
        ExportPolicy::Never => false,
        ExportPolicy::Ask => answer.map_or(false, is_yes),
    }
}

/// Finish a restart: export the transcript if asked to, then produce the
/// reset message. The reset is returned whether or not the export happened
/// or succeeded.
pub fn complete_restart(
    game: &GameStateMachine,
    transcript: Option<&Transcript>,
    dir: &Path,
    save: bool,
) -> (Option<String>, OutboundMessage) {
    let notice = transcript.and_then(|t| export_if_confirmed(dir, t, save));
    (notice, game.restart())
}

/// Save `transcript` when `save` is true, reporting the outcome as a notice.
pub fn export_if_confirmed(dir: &Path, transcript: &Transcript, save: bool) -> Option<String> {
    if !save {
        return None;
    }
    match write_transcript(dir, transcript) {
        Ok(path) => Some(format!("Saved conversation to {}", path.display())),
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "transcript export failed");
            Some(format!("Could not save conversation: {e}"))
        }
    }
}

/// Play one session until the user quits, stdin closes or the connection drops.
pub async fn run(config: Config) -> Result<()> {
    let session_id = Uuid::new_v4();
    let span = tracing::info_span!("session", %session_id, role = %config.role);
    run_inner(config).instrument(span).await
}

async fn run_inner(config: Config) -> Result<()> {
    let role = config.role;
    let (channel, mut events) = SessionChannel::open(&config.server_url, role);
    info!(url = channel.url(), "session starting");

    let mut renderer = Renderer::stdout(role, config.char_delay());
    renderer.print_header(channel.url())?;
    let (render_tx, render_task) = render::spawn(renderer);

    let mut game = GameStateMachine::new(role, config.template.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ChannelEvent::Message(msg)) => {
                        // Rejections are logged by the state machine; state is unchanged.
                        if let Ok(Some(change)) = game.handle(msg) {
                            show(&render_tx, RenderCommand::Game(change));
                        }
                    }
                    Some(ChannelEvent::Disconnected { reason }) => {
                        show(&render_tx, RenderCommand::Notice(format!("Disconnected: {reason}")));
                        break;
                    }
                    None => break,
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("input closed");
                    break;
                };
                match apply_command(&mut game, Command::parse(&line, role)) {
                    Step::Send(msg) => {
                        if let OutboundMessage::Choice(index) = &msg {
                            show(&render_tx, RenderCommand::Notice(format!("> picked {}", index.get())));
                        }
                        channel.send(msg);
                    }
                    Step::Restart(transcript) => {
                        let save = match (&transcript, config.export_policy) {
                            (None, _) => false,
                            (Some(_), ExportPolicy::Ask) => {
                                show(
                                    &render_tx,
                                    RenderCommand::Notice(
                                        "Would you like to save this conversation? [y/N]".to_string(),
                                    ),
                                );
                                let answer = lines.next_line().await.unwrap_or_else(|e| {
                                    warn!(error = %e, "could not read export answer");
                                    None
                                });
                                should_export(ExportPolicy::Ask, answer.as_deref())
                            }
                            (Some(_), policy) => should_export(policy, None),
                        };
                        let (notice, reset) =
                            complete_restart(&game, transcript.as_ref(), &config.export_dir, save);
                        if let Some(notice) = notice {
                            show(&render_tx, RenderCommand::Notice(notice));
                        }
                        channel.send(reset);
                    }
                    Step::Quit => break,
                    Step::Ignore => {}
                }
            }
        }
    }

    channel.shutdown().await;
    drop(render_tx);
    if let Err(e) = render_task.await {
        warn!(error = %e, "renderer task ended abnormally");
    }
    info!("session ended");
    Ok(())
}

fn show(render_tx: &mpsc::UnboundedSender<RenderCommand>, cmd: RenderCommand) {
    let _ = render_tx.send(cmd);
}
