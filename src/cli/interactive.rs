use std::io::{self, IsTerminal, Read, Write};

use anyhow::{Context, Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::actions::RegisteredAction;
use crate::update::{KeyInput, KeySource};

/// Single keypress from the terminal, or one byte from piped stdin.
pub(crate) struct TerminalKeys;

impl KeySource for TerminalKeys {
    fn read_key(&mut self) -> Result<KeyInput> {
        let key = if io::stdin().is_terminal() {
            read_raw_key()
        } else {
            read_piped_byte()
        };
        // Keep the echoed prompt line tidy whatever was typed.
        let _ = writeln!(io::stderr());
        key
    }
}

fn read_raw_key() -> Result<KeyInput> {
    read_raw_code().map(key_input)
}

fn read_raw_code() -> Result<KeyCode> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let code = loop {
        match event::read() {
            Ok(Event::Key(k)) if k.kind == KeyEventKind::Press => break Ok(k.code),
            Ok(_) => continue,
            Err(err) => break Err(anyhow!(err).context("failed to read key")),
        }
    };
    let _ = disable_raw_mode();
    code
}

fn read_piped_byte() -> Result<KeyInput> {
    let mut buf = [0u8; 1];
    let n = io::stdin().lock().read(&mut buf)?;
    if n == 0 {
        return Err(anyhow!("stdin closed before a key was read"));
    }
    Ok(KeyInput::from_char(char::from(buf[0])))
}

fn key_input(code: KeyCode) -> KeyInput {
    match code {
        KeyCode::Enter => KeyInput::Accept,
        KeyCode::Char(c) => KeyInput::from_char(c),
        _ => KeyInput::Other,
    }
}

/// Per-action confirmation for confirmation-tier actions in a live batch.
/// `--yes` approves everything; without a terminal nothing is approved.
pub(crate) fn confirmer(assume_yes: bool) -> impl FnMut(&RegisteredAction) -> bool {
    let interactive = io::stdin().is_terminal();
    move |action: &RegisteredAction| {
        if assume_yes {
            return true;
        }
        if !interactive {
            tracing::info!(action = %action.key, "no terminal to confirm on; pass --yes");
            return false;
        }
        let mut stderr = io::stderr().lock();
        let _ = write!(stderr, "{} requires confirmation. Run it? [y/N] ", action.key);
        let _ = stderr.flush();
        let code = read_raw_code();
        let _ = writeln!(stderr);
        // Enter alone declines here, unlike the update prompt.
        matches!(code, Ok(KeyCode::Char('y' | 'Y')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_codes_map_to_accept_or_other() {
        assert_eq!(key_input(KeyCode::Enter), KeyInput::Accept);
        assert_eq!(key_input(KeyCode::Char('y')), KeyInput::Accept);
        assert_eq!(key_input(KeyCode::Char('Y')), KeyInput::Accept);
        assert_eq!(key_input(KeyCode::Char('n')), KeyInput::Other);
        assert_eq!(key_input(KeyCode::Esc), KeyInput::Other);
    }
}
