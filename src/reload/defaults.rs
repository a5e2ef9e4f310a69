//! Built-in document defaults, seeded when a file is missing and used in
//! memory when a file cannot be parsed.

use super::DocumentName;
use serde_json::{Value, json};

pub fn default_document(name: DocumentName) -> Value {
    match name {
        DocumentName::Theme => json!({
            "version": 1,
            "theme": {
                "backgroundColor": [0, 0, 0],
                "backgroundOpacity": 0.25,
                "backdropBlurPx": 20,
                "textColor": [255, 255, 255],
                "mainTextOpacity": 1,
                "secondaryTextOpacity": 0.5,
                "baseFontSizePx": 16,
                "fontFamily": "Space Mono"
            }
        }),
        DocumentName::Ui => json!({
            "ui": {
                "scale": 1,
                "alwaysOnTop": true,
                "mediaWindow": { "visibilityMode": "auto" },
                "default_immersive_mode": "off"
            }
        }),
        DocumentName::Commands => json!({
            "version": 1,
            "commands": [
                {
                    "id": "open_notepad",
                    "name": "Notepad",
                    "action": { "type": "process", "cmd": "notepad.exe", "args": [] }
                },
                {
                    "id": "pause_media",
                    "name": "Play/pause media",
                    "action": { "type": "key", "keys": ["mediaPlayPause"] }
                }
            ]
        }),
    }
}
