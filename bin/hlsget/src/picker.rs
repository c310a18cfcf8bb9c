//! Interactive variant selection for master playlists.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use hlsget::UrlProperties;

/// Only single-digit selection is offered.
const MAX_CHOICES: usize = 9;
/// This many invalid keypresses in a row count as a cancel.
const MAX_INVALID_KEYS: usize = 5;

/// List the variants and let the user pick one with a single
/// keypress. `None` means the user cancelled.
pub fn pick_variant(variants: &[UrlProperties]) -> Option<usize> {
    let count = variants.len().min(MAX_CHOICES);

    println!("The playlist offers {} streams:", variants.len());
    for (i, variant) in variants.iter().take(count).enumerate() {
        let property = |key: &str| variant.properties.get(key).map(String::as_str).unwrap_or("?");
        println!(
            "  [{}] {:>9}  {:>9} bit/s  {}",
            i + 1,
            property("RESOLUTION"),
            property("BANDWIDTH"),
            property("CODECS"),
        );
    }
    println!("Choose with [1-{count}], ENTER takes the first, [c] cancels.");

    select_with(count, read_one_key)
}

enum PickKey {
    Enter,
    Cancel,
    Char(char),
    Other,
}

fn select_with(count: usize, mut read_key: impl FnMut() -> PickKey) -> Option<usize> {
    for _ in 0..MAX_INVALID_KEYS {
        match read_key() {
            PickKey::Enter => return Some(0),
            PickKey::Cancel => return None,
            PickKey::Char(key @ '1'..='9') => {
                let index = key as usize - '1' as usize;
                if index < count {
                    return Some(index);
                }
            }
            PickKey::Char(_) | PickKey::Other => {}
        }
    }

    None
}

/// Read one keypress in raw mode, without echo.
fn read_one_key() -> PickKey {
    if terminal::enable_raw_mode().is_err() {
        return PickKey::Cancel;
    }

    let key = loop {
        match event::read() {
            Ok(Event::Key(KeyEvent {
                code,
                modifiers,
                kind: KeyEventKind::Press,
                ..
            })) => {
                break match code {
                    KeyCode::Enter => PickKey::Enter,
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                        PickKey::Cancel
                    }
                    KeyCode::Char('d') if modifiers.contains(KeyModifiers::CONTROL) => {
                        PickKey::Cancel
                    }
                    KeyCode::Char('c') => PickKey::Cancel,
                    KeyCode::Char(key) => PickKey::Char(key),
                    _ => PickKey::Other,
                };
            }
            Ok(_) => continue,
            Err(_) => break PickKey::Cancel,
        }
    };

    let _ = terminal::disable_raw_mode();
    key
}
