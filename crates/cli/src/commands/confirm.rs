//! Terminal confirmation gate.

use std::io::{BufRead, Write};

use aiq_core::{Confirmation, Confirmer};
use async_trait::async_trait;

/// Asks on stderr and reads one line from stdin.
pub struct StdinConfirmer;

/// `y`/`yes` confirms, end of input cancels, anything else declines.
pub fn interpret(answer: Option<&str>) -> Confirmation {
    match answer.map(|a| a.trim().to_ascii_lowercase()) {
        None => Confirmation::Cancelled,
        Some(a) if a == "y" || a == "yes" => Confirmation::Confirmed,
        Some(_) => Confirmation::Declined,
    }
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> Confirmation {
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "\n{prompt} [y/N]: ");
            let _ = stderr.flush();

            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line),
            }
        })
        .await
        .ok()
        .flatten();

        interpret(answer.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers() {
        assert_eq!(interpret(Some("y\n")), Confirmation::Confirmed);
        assert_eq!(interpret(Some(" YES ")), Confirmation::Confirmed);
        assert_eq!(interpret(Some("n")), Confirmation::Declined);
        assert_eq!(interpret(Some("\n")), Confirmation::Declined);
        assert_eq!(interpret(None), Confirmation::Cancelled);
    }
}
