//! 4×4 matrix keypad input.

use crossbeam_channel::{unbounded, Receiver};
use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use crate::clock::Clock;

/// Physical layout, row-major.
pub const KEYMAP: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Digit(u8),
    /// One of the A-D function keys.
    Letter(char),
    Star,
    Hash,
}

impl Key {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            d @ '0'..='9' => Some(Key::Digit(d as u8 - b'0')),
            l @ 'A'..='D' => Some(Key::Letter(l)),
            '*' => Some(Key::Star),
            '#' => Some(Key::Hash),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match *self {
            Key::Digit(d) => char::from(b'0' + d),
            Key::Letter(l) => l,
            Key::Star => '*',
            Key::Hash => '#',
        }
    }
}

/// Non-blocking key source, polled by the firmware loop.
pub trait Keypad {
    /// The next pressed key, if any.
    fn poll_key(&mut self) -> Option<Key>;
}

/// Blocking reads on top of a polled [`Keypad`].
pub struct KeypadReader<'a> {
    keypad: &'a mut dyn Keypad,
    clock: &'a dyn Clock,
    poll_interval: Duration,
}

impl<'a> KeypadReader<'a> {
    pub fn new(keypad: &'a mut dyn Keypad, clock: &'a dyn Clock, poll_interval: Duration) -> Self {
        Self {
            keypad,
            clock,
            poll_interval,
        }
    }

    pub fn wait_for_key(&mut self) -> Key {
        loop {
            if let Some(key) = self.keypad.poll_key() {
                return key;
            }
            self.clock.sleep(self.poll_interval);
        }
    }

    /// Wait for a key accepted by `accept`, ignoring all others.
    pub fn wait_for<F>(&mut self, accept: F) -> Key
    where
        F: Fn(Key) -> bool,
    {
        loop {
            let key = self.wait_for_key();
            if accept(key) {
                return key;
            }
            log::debug!("⌨️ Ignoring key '{}'", key.as_char());
        }
    }

    /// Collect digits until `#`. Digits past `max_len` are dropped; other keys
    /// are ignored. Returns the digits and how many were typed in total.
    pub fn read_digits(&mut self, max_len: usize) -> (String, usize) {
        let mut digits = String::with_capacity(max_len);
        let mut typed = 0;
        loop {
            match self.wait_for_key() {
                Key::Hash => return (digits, typed),
                Key::Digit(d) => {
                    typed += 1;
                    if digits.len() < max_len {
                        digits.push(char::from(b'0' + d));
                    }
                }
                _ => {}
            }
        }
    }
}

/// Keypad emulated on stdin for host runs. Each typed character that maps to
/// a key is one press; everything else is ignored.
pub struct ConsoleKeypad {
    keys: Receiver<Key>,
}

impl ConsoleKeypad {
    pub fn spawn() -> Self {
        let (sender, keys) = unbounded();
        thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                for key in line.chars().filter_map(Key::from_char) {
                    if sender.send(key).is_err() {
                        return;
                    }
                }
            }
            log::debug!("⌨️ Console keypad input closed");
        });
        Self { keys }
    }
}

impl Keypad for ConsoleKeypad {
    fn poll_key(&mut self) -> Option<Key> {
        self.keys.try_recv().ok()
    }
}
