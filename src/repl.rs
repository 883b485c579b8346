//! Interactive REPL for kgchat
//!
//! Provides a readline-based interface with:
//! - Command history
//! - Streaming answer display
//! - Session management commands
//! - Memory consolidation commands

pub mod colors;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write as _;

use crate::controller::ChatController;
use crate::memory::Relationship;
use crate::retrieval::RetrievalHit;
use crate::session::types::{Role, Turn};
use crate::surface::ChatSurface;

use colors::ansi::*;

/// Terminal implementation of the render seam
pub struct AnsiSurface;

impl AnsiSurface {
    fn flush() {
        let _ = std::io::stdout().flush();
    }
}

impl ChatSurface for AnsiSurface {
    fn render_turn(&self, turn: &Turn) {
        match turn.role {
            Role::User => println!("{} {}", colors::status("you ›"), turn.content),
            Role::Assistant => println!("{} {}", colors::header("kg ›"), turn.content),
        }
    }

    fn stream_chunk(&self, text: &str) {
        print!("{text}");
        Self::flush();
    }

    fn stream_end(&self) {
        println!();
    }

    fn notice(&self, message: &str) {
        println!("{}", colors::status(message));
    }

    fn muted(&self, message: &str) {
        println!("{}{}{}{}", DIM, GRAY, message, RESET);
    }

    fn error(&self, message: &str) {
        println!("{}", colors::error(message));
    }

    fn update_graph(&self, query: &str) {
        println!("{} {}", colors::status("graph ›"), colors::graph_query(query));
    }

    fn show_context(&self, context: &str) {
        println!("{} {}", colors::status("context ›"), colors::status(context));
    }

    fn render_evidence(&self, shown: &[RetrievalHit], total: usize) {
        if shown.is_empty() {
            return;
        }
        println!("{}", colors::header("evidence"));
        for hit in shown {
            println!(
                "  [{}] {} {}",
                hit.id,
                colors::score(hit.score),
                truncate(&hit.snippet, 120)
            );
        }
        if total > shown.len() {
            self.muted(&format!("({} more, /evidence for all)", total - shown.len()));
        }
    }

    fn show_suggestion(&self, query: &str) {
        println!("{} {}", colors::status("try ›"), colors::graph_query(query));
    }

    fn clear_evidence(&self) {
        // nothing to tear down in a scrolling terminal
    }

    fn show_summary(&self, summary: &str) {
        println!("{}", colors::separator(50));
        println!("{}", colors::header("summary for review"));
        println!("{summary}");
        println!("{}", colors::separator(50));
    }

    fn show_outcome(&self, relationship: Relationship, message: &str) {
        println!(
            "{} {}",
            colors::success(&format!("memory committed ({})", relationship.as_str())),
            message
        );
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// REPL state
pub struct Repl {
    /// Readline editor with history
    editor: DefaultEditor,
    controller: ChatController,
    /// History file path
    history_path: std::path::PathBuf,
}

impl Repl {
    pub fn new(controller: ChatController) -> Result<Self> {
        let editor = DefaultEditor::new()?;

        // History file in ~/.kgchat/history
        let history_path = dirs::home_dir()
            .unwrap_or_default()
            .join(".kgchat")
            .join("history");

        Ok(Self {
            editor,
            controller,
            history_path,
        })
    }

    fn load_history(&mut self) {
        if self.history_path.exists() {
            let _ = self.editor.load_history(&self.history_path);
        }
    }

    fn save_history(&mut self) {
        if let Some(parent) = self.history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = self.editor.save_history(&self.history_path);
    }

    /// Run the REPL loop
    pub async fn run(&mut self) -> Result<()> {
        self.load_history();

        println!("Ask about the knowledge graph (Ctrl+D to exit, /help for commands)");
        println!();

        loop {
            let readline = self.editor.readline(">>> ");

            match readline {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    self.editor.add_history_entry(&line)?;

                    if trimmed.starts_with('/') {
                        if self.handle_command(trimmed).await {
                            break;
                        }
                        continue;
                    }

                    if let Err(e) = self.controller.ask(trimmed).await {
                        println!("{}", colors::error(&e.to_string()));
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("Goodbye!");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }
        }

        self.save_history();
        Ok(())
    }

    /// Dispatch a slash command; returns true to quit
    async fn handle_command(&mut self, line: &str) -> bool {
        let mut parts = line.splitn(2, ' ');
        let command = parts.next().unwrap_or("");
        let rest = parts.next().map(str::trim).unwrap_or("");

        let result = match command {
            "/help" => {
                print_help();
                Ok(())
            }
            "/sessions" => self.show_sessions().await,
            "/new" => {
                let title = (!rest.is_empty()).then_some(rest);
                self.controller.new_session(title).await
            }
            "/switch" => self.switch(rest).await,
            "/rename" => {
                if rest.is_empty() {
                    println!("{}", colors::warning("usage: /rename <title>"));
                    Ok(())
                } else {
                    self.controller.rename_session(rest).await
                }
            }
            "/delete" => self.controller.delete_session().await,
            "/evidence" => {
                self.controller.show_evidence();
                Ok(())
            }
            "/remember" => self.controller.begin_consolidation(),
            "/pick" => self.pick(rest),
            "/summarize" => self.controller.submit_consolidation().await,
            "/commit" => self.controller.commit_consolidation().await,
            "/cancel" => self.controller.cancel_consolidation(),
            "/quit" | "/exit" => return true,
            _ => {
                println!("{}", colors::warning(&format!("unknown command: {command}")));
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("{}", colors::error(&e.to_string()));
        }
        false
    }

    async fn show_sessions(&mut self) -> crate::Result<()> {
        let active = self.controller.registry().active_id().map(str::to_string);
        let sessions = self.controller.list_sessions().await?;
        if sessions.is_empty() {
            println!("{}", colors::status("no sessions"));
            return Ok(());
        }
        for (i, meta) in sessions.iter().enumerate() {
            let marker = if active.as_deref() == Some(meta.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!(
                "{marker} {:>2}  {}  {}",
                i + 1,
                colors::session_title(&meta.title),
                colors::status(&format!("({} msgs)", meta.message_count))
            );
        }
        Ok(())
    }

    /// Switch by list position (1-based) or by raw session id
    async fn switch(&mut self, arg: &str) -> crate::Result<()> {
        if arg.is_empty() {
            println!("{}", colors::warning("usage: /switch <number|id>"));
            return Ok(());
        }
        let id = match arg.parse::<usize>() {
            Ok(n) if n >= 1 => {
                let sessions = self.controller.list_sessions().await?;
                match sessions.get(n - 1) {
                    Some(meta) => meta.id.clone(),
                    None => {
                        println!("{}", colors::warning(&format!("no session #{n}")));
                        return Ok(());
                    }
                }
            }
            _ => arg.to_string(),
        };
        self.controller.switch_session(&id).await
    }

    /// Toggle one or more turn indices in the consolidation selection
    fn pick(&mut self, rest: &str) -> crate::Result<()> {
        if rest.is_empty() {
            println!("{}", colors::warning("usage: /pick <index> [index...]"));
            return Ok(());
        }
        for token in rest.split([' ', ',']).filter(|t| !t.is_empty()) {
            match token.parse::<usize>() {
                Ok(index) => {
                    self.controller.toggle_selection(index)?;
                }
                Err(_) => {
                    println!("{}", colors::warning(&format!("not a turn index: {token}")));
                }
            }
        }
        Ok(())
    }
}

fn print_help() {
    println!("{}", colors::header("commands"));
    println!("  /sessions            list sessions (most recent first)");
    println!("  /new [title]         start a session");
    println!("  /switch <n|id>       make another session active");
    println!("  /rename <title>      rename the active session");
    println!("  /delete              delete the active session");
    println!("  /evidence            show all evidence for the last question");
    println!("  /remember            start memory consolidation");
    println!("  /pick <i> [j...]     toggle turns in the selection");
    println!("  /summarize           summarize the selected turns");
    println!("  /commit              commit the reviewed summary");
    println!("  /cancel              cancel the consolidation");
    println!("  /quit                exit");
}
