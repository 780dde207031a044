//! PIN entry with a bounded retry budget.
//!
//! Digits are kept in a secret box from the moment they are typed and are
//! never logged. Length is checked locally; an attempt of the wrong length
//! is re-prompted without costing a retry.

use secrecy::{ExposeSecret, SecretBox};
use std::io::{self, Write};

use crate::error::{EdgeError, Result};
use crate::keypad::KeypadReader;

pub const PIN_LENGTH: usize = 4;
pub const MAX_ATTEMPTS: u32 = 3;

/// One `#`-terminated PIN entry.
pub struct PinAttempt {
    digits: SecretBox<String>,
    typed: usize,
}

impl PinAttempt {
    pub fn new(digits: String, typed: usize) -> Self {
        Self {
            digits: SecretBox::new(Box::new(digits)),
            typed,
        }
    }

    /// Digits typed, including any past the cap.
    pub fn typed(&self) -> usize {
        self.typed
    }

    /// Digits past the cap are dropped, so only short entries fail.
    pub fn validate(&self, length: usize) -> Result<()> {
        let got = self.digits.expose_secret().len();
        if got != length {
            return Err(EdgeError::Validation(format!(
                "PIN must be exactly {} digits (got {})",
                length, got
            )));
        }
        Ok(())
    }

    pub fn secret(&self) -> &SecretBox<String> {
        &self.digits
    }
}

impl std::fmt::Debug for PinAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinAttempt")
            .field("digits", &"[REDACTED]")
            .field("typed", &self.typed)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// Decides each PIN attempt and hears about the flow's progress.
pub trait PinVerifier {
    fn verify(&mut self, attempt: &PinAttempt) -> Verdict;

    /// An attempt was rejected; `remaining` tries are left.
    fn rejected(&mut self, _remaining: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Accepted { attempts: u32 },
    Lockout,
}

#[derive(Debug, Clone, Copy)]
pub struct PinEntryFlow {
    pin_length: usize,
    max_attempts: u32,
}

impl Default for PinEntryFlow {
    fn default() -> Self {
        Self {
            pin_length: PIN_LENGTH,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl PinEntryFlow {
    pub fn new(pin_length: usize, max_attempts: u32) -> Self {
        Self {
            pin_length,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Read entries until one has the right length.
    pub fn read_valid(&self, reader: &mut KeypadReader<'_>) -> PinAttempt {
        loop {
            let (digits, typed) = reader.read_digits(self.pin_length);
            echo_masked(digits.len());
            let attempt = PinAttempt::new(digits, typed);
            match attempt.validate(self.pin_length) {
                Ok(()) => {
                    if attempt.typed() > self.pin_length {
                        log::debug!(
                            "⌨️ Ignored {} digit(s) past the PIN length",
                            attempt.typed() - self.pin_length
                        );
                    }
                    return attempt;
                }
                Err(e) => {
                    log::info!("⌨️ {}, try again", e);
                    println!("Şifre {} haneli olmalı. Tekrar girin.", self.pin_length);
                }
            }
        }
    }

    /// Run attempts until one is accepted or the budget is spent.
    pub fn run(&self, reader: &mut KeypadReader<'_>, verifier: &mut dyn PinVerifier) -> PinOutcome {
        let mut failures = 0;
        loop {
            let attempt = self.read_valid(reader);
            match verifier.verify(&attempt) {
                Verdict::Accepted => {
                    return PinOutcome::Accepted {
                        attempts: failures + 1,
                    }
                }
                Verdict::Rejected => {
                    failures += 1;
                    let remaining = self.max_attempts - failures;
                    log::warn!("🔒 PIN rejected, {} attempt(s) left", remaining);
                    verifier.rejected(remaining);
                    if remaining == 0 {
                        return PinOutcome::Lockout;
                    }
                }
            }
        }
    }
}

fn echo_masked(len: usize) {
    let mut stdout = io::stdout();
    let _ = writeln!(stdout, "{}", "*".repeat(len));
    let _ = stdout.flush();
}
