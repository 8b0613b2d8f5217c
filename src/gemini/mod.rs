//! Gemini API Anbindung
//!
//! Zwei Wege zum Modell: die Live-Session über WebSocket für den
//! Sprachkanal und ein einfacher generateContent-Aufruf für die
//! Symptom-Analyse im Text-Tab.

mod live;
mod messages;
mod text;

pub use live::{LiveClient, LiveError, LiveEvent, LiveSender};
pub use messages::{
    Content, MediaBlob, Part, RealtimeInputMessage, ServerContent, ServerMessage, SetupMessage,
};
pub use text::{analyze_symptoms, TextError};
