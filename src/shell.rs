//! Line-oriented command shell: `INSERT <username> <email>`, `SELECT`, `.exit`.

use crate::database::Database;
use anyhow::Result;
use log::error;
use std::io::{BufRead, Write};

pub const PROMPT: &str = "db > ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Insert { username: String, email: String },
    Select,
    Exit,
    /// Blank line
    Empty,
    Unknown,
}

/// Whether the shell keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Exit,
}

/// Parse one input line. Verbs match case-insensitively; a verb with the
/// wrong number of arguments is an unknown command.
pub fn parse_command(line: &str) -> Command {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Command::Empty;
    };
    let args: Vec<&str> = words.collect();

    if verb.eq_ignore_ascii_case("insert") {
        match args.as_slice() {
            [username, email] => Command::Insert {
                username: username.to_string(),
                email: email.to_string(),
            },
            _ => Command::Unknown,
        }
    } else if verb.eq_ignore_ascii_case("select") && args.is_empty() {
        Command::Select
    } else if verb.eq_ignore_ascii_case(".exit") && args.is_empty() {
        Command::Exit
    } else {
        Command::Unknown
    }
}

/// Run one line against `db`, writing any output to `out`.
///
/// A rejected insert prints `Page Overflow` and is not an error. Other
/// storage failures are returned to the caller.
pub fn execute<W: Write>(db: &mut Database, line: &str, out: &mut W) -> Result<Outcome> {
    match parse_command(line) {
        Command::Insert { username, email } => match db.insert(&username, &email) {
            Ok(_) => {}
            Err(e) if e.is_overflow() => writeln!(out, "Page Overflow")?,
            Err(e) => return Err(e.into()),
        },
        Command::Select => {
            for record in db.scan()? {
                writeln!(out, "{}", record?)?;
            }
        }
        Command::Exit => {
            db.flush()?;
            return Ok(Outcome::Exit);
        }
        Command::Empty => {}
        Command::Unknown => writeln!(out, "Unknown command")?,
    }
    Ok(Outcome::Continue)
}

/// Read commands from `input` until `.exit` or end of input. End of input
/// flushes like `.exit`. Failed commands are reported and the loop goes on.
pub fn run<R: BufRead, W: Write>(
    db: &mut Database,
    mut input: R,
    out: &mut W,
    show_prompt: bool,
) -> Result<()> {
    let mut line = String::new();
    loop {
        if show_prompt {
            write!(out, "{}", PROMPT)?;
            out.flush()?;
        }

        line.clear();
        if input.read_line(&mut line)? == 0 {
            db.flush()?;
            return Ok(());
        }

        match execute(db, line.trim(), out) {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Exit) => return Ok(()),
            Err(e) => {
                error!("command failed: {:#}", e);
                writeln!(out, "Error: {:#}", e)?;
            }
        }
    }
}
