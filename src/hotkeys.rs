use anyhow::{Context, Result};
use evdev::{EventSummary, KeyCode};
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Logical actions a hotkey can trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HotkeyAction {
    Screenshot,
    RecordToggle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Super,
}

impl Modifier {
    /// Either side of the modifier counts as held
    fn is_down(&self, pressed: &HashSet<KeyCode>) -> bool {
        let (left, right) = match self {
            Modifier::Ctrl => (KeyCode::KEY_LEFTCTRL, KeyCode::KEY_RIGHTCTRL),
            Modifier::Alt => (KeyCode::KEY_LEFTALT, KeyCode::KEY_RIGHTALT),
            Modifier::Shift => (KeyCode::KEY_LEFTSHIFT, KeyCode::KEY_RIGHTSHIFT),
            Modifier::Super => (KeyCode::KEY_LEFTMETA, KeyCode::KEY_RIGHTMETA),
        };
        pressed.contains(&left) || pressed.contains(&right)
    }
}

/// A parsed key combination: zero or more modifiers plus one terminal key
#[derive(Clone, Debug, PartialEq)]
pub struct KeyCombo {
    modifiers: Vec<Modifier>,
    key: KeyCode,
}

/// Parse a combo string like "CTRL+ALT+PRINTSCREEN".
///
/// Also accepts the legacy config spelling "<ctrl>+<alt>+<print_screen>".
pub fn parse_combo(combo: &str) -> Result<KeyCombo> {
    let tokens: Vec<String> = combo
        .split('+')
        .map(|t| {
            t.trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .replace('_', "")
                .to_uppercase()
        })
        .filter(|t| !t.is_empty())
        .collect();

    let Some((key_token, modifier_tokens)) = tokens.split_last() else {
        return Err(anyhow::anyhow!("Empty hotkey combo: {:?}", combo));
    };

    let mut modifiers = Vec::new();
    for token in modifier_tokens {
        let modifier = parse_modifier(token)
            .with_context(|| format!("Unknown modifier {:?} in combo {:?}", token, combo))?;
        if !modifiers.contains(&modifier) {
            modifiers.push(modifier);
        }
    }

    if parse_modifier(key_token).is_some() {
        return Err(anyhow::anyhow!(
            "Combo {:?} must end with a non-modifier key",
            combo
        ));
    }

    let key = key_from_name(key_token)
        .with_context(|| format!("Unknown key {:?} in combo {:?}", key_token, combo))?;

    Ok(KeyCombo { modifiers, key })
}

fn parse_modifier(token: &str) -> Option<Modifier> {
    match token {
        "CTRL" | "CONTROL" => Some(Modifier::Ctrl),
        "ALT" => Some(Modifier::Alt),
        "SHIFT" => Some(Modifier::Shift),
        "SUPER" | "META" | "LOGO" | "WIN" => Some(Modifier::Super),
        _ => None,
    }
}

fn key_from_name(name: &str) -> Option<KeyCode> {
    let key = match name {
        "PRINTSCREEN" | "PRINT" | "SYSRQ" => KeyCode::KEY_SYSRQ,
        "SPACE" => KeyCode::KEY_SPACE,
        "ENTER" | "RETURN" => KeyCode::KEY_ENTER,
        "TAB" => KeyCode::KEY_TAB,
        "ESC" | "ESCAPE" => KeyCode::KEY_ESC,
        "HOME" => KeyCode::KEY_HOME,
        "END" => KeyCode::KEY_END,
        "INSERT" => KeyCode::KEY_INSERT,
        "DELETE" => KeyCode::KEY_DELETE,
        "BACKSPACE" => KeyCode::KEY_BACKSPACE,
        "PAUSE" => KeyCode::KEY_PAUSE,
        "A" => KeyCode::KEY_A,
        "B" => KeyCode::KEY_B,
        "C" => KeyCode::KEY_C,
        "D" => KeyCode::KEY_D,
        "E" => KeyCode::KEY_E,
        "F" => KeyCode::KEY_F,
        "G" => KeyCode::KEY_G,
        "H" => KeyCode::KEY_H,
        "I" => KeyCode::KEY_I,
        "J" => KeyCode::KEY_J,
        "K" => KeyCode::KEY_K,
        "L" => KeyCode::KEY_L,
        "M" => KeyCode::KEY_M,
        "N" => KeyCode::KEY_N,
        "O" => KeyCode::KEY_O,
        "P" => KeyCode::KEY_P,
        "Q" => KeyCode::KEY_Q,
        "R" => KeyCode::KEY_R,
        "S" => KeyCode::KEY_S,
        "T" => KeyCode::KEY_T,
        "U" => KeyCode::KEY_U,
        "V" => KeyCode::KEY_V,
        "W" => KeyCode::KEY_W,
        "X" => KeyCode::KEY_X,
        "Y" => KeyCode::KEY_Y,
        "Z" => KeyCode::KEY_Z,
        "0" => KeyCode::KEY_0,
        "1" => KeyCode::KEY_1,
        "2" => KeyCode::KEY_2,
        "3" => KeyCode::KEY_3,
        "4" => KeyCode::KEY_4,
        "5" => KeyCode::KEY_5,
        "6" => KeyCode::KEY_6,
        "7" => KeyCode::KEY_7,
        "8" => KeyCode::KEY_8,
        "9" => KeyCode::KEY_9,
        "F1" => KeyCode::KEY_F1,
        "F2" => KeyCode::KEY_F2,
        "F3" => KeyCode::KEY_F3,
        "F4" => KeyCode::KEY_F4,
        "F5" => KeyCode::KEY_F5,
        "F6" => KeyCode::KEY_F6,
        "F7" => KeyCode::KEY_F7,
        "F8" => KeyCode::KEY_F8,
        "F9" => KeyCode::KEY_F9,
        "F10" => KeyCode::KEY_F10,
        "F11" => KeyCode::KEY_F11,
        "F12" => KeyCode::KEY_F12,
        _ => return None,
    };
    Some(key)
}

/// Typed mapping from logical actions to key combos, validated at load time
#[derive(Clone, Debug)]
pub struct Keymap {
    bindings: Vec<(HotkeyAction, KeyCombo)>,
}

impl Keymap {
    pub fn from_config(screenshot_combo: &str, record_combo: &str) -> Result<Self> {
        let screenshot = parse_combo(screenshot_combo)
            .with_context(|| format!("Invalid screenshot_hotkey: {:?}", screenshot_combo))?;
        let record = parse_combo(record_combo)
            .with_context(|| format!("Invalid record_hotkey: {:?}", record_combo))?;

        Ok(Self {
            bindings: vec![
                (HotkeyAction::Screenshot, screenshot),
                (HotkeyAction::RecordToggle, record),
            ],
        })
    }

    /// Check whether a key press completes one of the bound combos.
    ///
    /// `pressed` is the set of keys currently held (including `key`).
    /// More specific bindings (more modifiers) win when several match.
    fn match_press(&self, key: KeyCode, pressed: &HashSet<KeyCode>) -> Option<HotkeyAction> {
        self.bindings
            .iter()
            .filter(|(_, combo)| {
                combo.key == key && combo.modifiers.iter().all(|m| m.is_down(pressed))
            })
            .max_by_key(|(_, combo)| combo.modifiers.len())
            .map(|(action, _)| *action)
    }
}

/// Monitor all keyboards via evdev and send an action each time a bound
/// combo is pressed. Spawns one task per keyboard device.
pub async fn monitor_keyboards(keymap: Keymap, tx: mpsc::Sender<HotkeyAction>) -> Result<()> {
    let mut keyboards = 0;

    for (path, device) in evdev::enumerate() {
        let is_keyboard = device
            .supported_keys()
            .map(|keys| keys.contains(KeyCode::KEY_A))
            .unwrap_or(false);

        if !is_keyboard {
            continue;
        }

        tracing::debug!("Monitoring keyboard: {:?}", path);
        keyboards += 1;

        let keymap = keymap.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor_device(device, keymap, tx).await {
                tracing::warn!("Keyboard monitor for {:?} exited: {}", path, e);
            }
        });
    }

    if keyboards == 0 {
        return Err(anyhow::anyhow!(
            "No keyboard devices found (is the user in the 'input' group?)"
        ));
    }

    tracing::info!("Monitoring {} keyboard device(s)", keyboards);
    Ok(())
}

async fn monitor_device(
    device: evdev::Device,
    keymap: Keymap,
    tx: mpsc::Sender<HotkeyAction>,
) -> Result<()> {
    let mut stream = device
        .into_event_stream()
        .context("Failed to open event stream")?;
    let mut pressed: HashSet<KeyCode> = HashSet::new();

    loop {
        let event = stream.next_event().await.context("Event stream closed")?;

        if let EventSummary::Key(_, key, value) = event.destructure() {
            match value {
                1 => {
                    pressed.insert(key);
                    if let Some(action) = keymap.match_press(key, &pressed) {
                        tracing::debug!("Hotkey matched: {:?}", action);
                        if tx.send(action).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                0 => {
                    pressed.remove(&key);
                }
                // Ignore key repeat
                _ => {}
            }
        }
    }
}
