//! Terminal presentation of game events.
//!
//! The renderer is the only place that writes to the terminal. It runs as its
//! own task fed by an ordered queue, so the per-character typewriter effect
//! never holds up the state machine.

use colored::*;
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::game::GameEvent;
use crate::protocol::{Candidate, Role};

/// One thing to show.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    Game(GameEvent),
    /// A status line from the session (disconnects, saved files, questions).
    Notice(String),
}

pub struct Renderer<W: Write> {
    out: W,
    role: Role,
    char_delay: Option<Duration>,
}

impl Renderer<io::Stdout> {
    pub fn stdout(role: Role, char_delay: Option<Duration>) -> Self {
        Renderer::new(io::stdout(), role, char_delay)
    }
}

impl<W: Write> Renderer<W> {
    /// `char_delay` of `None` prints appended text in one go.
    pub fn new(out: W, role: Role, char_delay: Option<Duration>) -> Self {
        Renderer {
            out,
            role,
            char_delay,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn print_header(&mut self, server: &str) -> io::Result<()> {
        writeln!(self.out, "{}", "NEXT TOKEN GAME".bright_cyan().bold())?;
        writeln!(
            self.out,
            "{}: {}",
            "Role".bright_yellow(),
            match self.role {
                Role::Asker => "outside (ask the question)",
                Role::Chooser => "inside (choose the next word)",
            }
        )?;
        writeln!(self.out, "{}: {}", "Server".bright_yellow(), server)?;
        let help = match self.role {
            Role::Asker => "Type a question and press Enter. /restart starts over, /quit leaves.",
            Role::Chooser => "Type 1-5 to pick a word. /restart starts over, /quit leaves.",
        };
        writeln!(self.out, "{}", help.dimmed())?;
        writeln!(self.out, "{}", "=".repeat(50).bright_blue())?;
        self.idle_line()?;
        self.out.flush()
    }

    pub async fn render(&mut self, cmd: &RenderCommand) -> io::Result<()> {
        match cmd {
            RenderCommand::Notice(text) => {
                writeln!(self.out, "\n{}", text.bright_magenta())?;
            }
            RenderCommand::Game(event) => self.render_event(event).await?,
        }
        self.out.flush()
    }

    async fn render_event(&mut self, event: &GameEvent) -> io::Result<()> {
        match event {
            GameEvent::PromptReceived { prompt } => match self.role {
                Role::Chooser => {
                    writeln!(self.out, "{} {}", "USER QUERY:".bright_yellow().bold(), prompt)?;
                    writeln!(self.out, "{}", "OUR RESPONSE".bold())?;
                }
                Role::Asker => writeln!(self.out, "{}", "...".dimmed())?,
            },
            GameEvent::Appended { text } => self.typewrite(text).await?,
            GameEvent::ChoicesOffered(candidates) => self.print_choices(candidates)?,
            GameEvent::Finished => {
                let done = match self.role {
                    Role::Chooser => "// RESPONSE COMPLETE //",
                    Role::Asker => "Done. /restart to ask something else.",
                };
                writeln!(self.out, "\n{}", done.bright_green().bold())?;
            }
            GameEvent::Reset => {
                writeln!(self.out, "\n{}", "=".repeat(50).bright_blue())?;
                self.idle_line()?;
            }
        }
        Ok(())
    }

    fn idle_line(&mut self) -> io::Result<()> {
        let line = match self.role {
            Role::Chooser => "WAITING FOR USER QUERY...",
            Role::Asker => "Ask your question!",
        };
        writeln!(self.out, "{}", line.bright_white().bold())
    }

    async fn typewrite(&mut self, text: &str) -> io::Result<()> {
        let Some(delay) = self.char_delay else {
            return write!(self.out, "{}", text);
        };
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            self.out.write_all(ch.encode_utf8(&mut buf).as_bytes())?;
            self.out.flush()?;
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn print_choices(&mut self, candidates: &[Candidate]) -> io::Result<()> {
        writeln!(self.out)?;
        for (i, c) in candidates.iter().enumerate() {
            writeln!(
                self.out,
                "  {} {:<20} {}",
                format!("[{}]", i + 1).bright_cyan().bold(),
                format!("{:?}", c.text),
                format!("{}%", c.percent()).bright_yellow()
            )?;
        }
        writeln!(
            self.out,
            "{}",
            "Select the next word to continue the response".dimmed()
        )
    }
}

/// Run `renderer` on its own task. The task ends once every sender is dropped
/// and the queue has drained.
pub fn spawn<W>(mut renderer: Renderer<W>) -> (mpsc::UnboundedSender<RenderCommand>, JoinHandle<()>)
where
    W: Write + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<RenderCommand>();
    let task = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            if let Err(e) = renderer.render(&cmd).await {
                tracing::error!(error = %e, "terminal write failed, renderer stopping");
                break;
            }
        }
    });
    (tx, task)
}
