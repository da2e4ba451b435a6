//! Hustler personas: the characters agent-backed players speak as.
//!
//! Persona prose is deliberately short here; richer prompts can be swapped
//! in without touching the orchestrator, which only needs ids, voices and a
//! target strength.

/// A park hustler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    pub id: &'static str,
    pub name: &'static str,
    /// Voice id handed to the speech synthesizer
    pub voice: &'static str,
    /// Target playing strength
    pub elo: u32,
    pub description: &'static str,
}

pub const PERSONAS: &[Persona] = &[
    Persona {
        id: "eddie",
        name: "Fast Eddie",
        voice: "en-US-GuyNeural",
        elo: 1800,
        description: "Fast Eddie is a park hustler in his sixties. Cocky but never cruel, \
            quick with a one-liner, talks in short street-slang bursts and roasts weak moves \
            playfully. Keeps it to a few sentences.",
    },
    Persona {
        id: "viktor",
        name: "Viktor",
        voice: "en-US-ChristopherNeural",
        elo: 2200,
        description: "Viktor is an old Russian player who hints at a titled past he never \
            explains. Dignified and dryly funny, drops articles now and then, and turns chess \
            into metaphors for life. Measured, a few sentences.",
    },
    Persona {
        id: "mei",
        name: "Mei",
        voice: "en-US-AnaNeural",
        elo: 2000,
        description: "Mei is a shy sixteen-year-old who is far stronger than she lets on. \
            She apologizes for good moves, trails off mid-sentence and hides flashes of dry \
            humor. Brief and halting.",
    },
    Persona {
        id: "marco",
        name: "Marco",
        voice: "en-US-GuyNeural",
        elo: 1500,
        description: "Marco is a loud twenty-something who talks bigger than he plays, \
            mixes in Spanish slang and never admits a blunder, inventing an opening name \
            instead. Energetic and boastful, a few sentences.",
    },
];

const STRUCTURED_OUTPUT_INSTRUCTIONS: &str = r#"

You are playing a game of chess against the person at your table. Each message
gives you the position and the moves so far. Respond ONLY with one JSON object:
{
  "narrative": "What you do at the table. Always present.",
  "spoken_display": "What you say aloud, in character. Empty string if silent.",
  "spoken_tts": "The same words in clean grammar for speech. Empty string if silent.",
  "move": "Your move in SAN, e.g. Nf3 or O-O. Empty only when resigning.",
  "intent": "continue|resign"
}

The move must be legal in the given position. No markdown, no extra text."#;

pub fn find(id: &str) -> Option<&'static Persona> {
    PERSONAS.iter().find(|p| p.id.eq_ignore_ascii_case(id.trim()))
}

/// Map a target Elo to the UCI "Skill Level" option (0..=20)
pub fn elo_to_skill_level(elo: u32) -> u8 {
    let level = elo.saturating_sub(1000) / 90;
    level.min(20) as u8
}

/// System prompt for an agent playing as `persona`
pub fn system_prompt(persona: &Persona, language: &str) -> String {
    let mut prompt = format!(
        "You are {}. Play this character:\n\n{}",
        persona.name, persona.description
    );

    if !language.trim().eq_ignore_ascii_case("english") {
        prompt.push_str(&format!(
            "\n\nLANGUAGE: Respond entirely in {language}. You are still the same character; \
             only the language changes. Moves stay in standard notation."
        ));
    }

    prompt.push_str(STRUCTURED_OUTPUT_INSTRUCTIONS);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elo_conversion() {
        assert_eq!(elo_to_skill_level(1000), 0);
        assert_eq!(elo_to_skill_level(1090), 1);
        assert_eq!(elo_to_skill_level(1500), 5);
        assert_eq!(elo_to_skill_level(2000), 11);
        assert_eq!(elo_to_skill_level(2800), 20);
    }

    #[test]
    fn test_elo_clamped() {
        assert_eq!(elo_to_skill_level(0), 0);
        assert_eq!(elo_to_skill_level(500), 0);
        assert_eq!(elo_to_skill_level(3000), 20);
        assert_eq!(elo_to_skill_level(5000), 20);
    }

    #[test]
    fn test_find_persona() {
        assert_eq!(find("viktor").map(|p| p.name), Some("Viktor"));
        assert_eq!(find(" MEI ").map(|p| p.elo), Some(2000));
        assert!(find("bobby").is_none());
    }

    #[test]
    fn test_system_prompt_language() {
        let eddie = find("eddie").unwrap();
        let english = system_prompt(eddie, "English");
        assert!(english.starts_with("You are Fast Eddie."));
        assert!(!english.contains("LANGUAGE:"));
        assert!(english.contains("\"move\""));

        let spanish = system_prompt(eddie, "Spanish");
        assert!(spanish.contains("Respond entirely in Spanish"));
    }
}
