//! Viseme alphabet, mouth-shape table and the placeholder text mapping.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const VISEME_COUNT: usize = 20;

/// A mouth-shape archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Viseme {
    A, E, I, O, U,
    F, M, B, P, R,
    S, T, D, L, N,
    G, K, H, W, Y,
}

impl Viseme {
    pub const ALL: [Viseme; VISEME_COUNT] = [
        Viseme::A, Viseme::E, Viseme::I, Viseme::O, Viseme::U,
        Viseme::F, Viseme::M, Viseme::B, Viseme::P, Viseme::R,
        Viseme::S, Viseme::T, Viseme::D, Viseme::L, Viseme::N,
        Viseme::G, Viseme::K, Viseme::H, Viseme::W, Viseme::Y,
    ];

    /// Neutral shape used for unknown symbols and pauses.
    pub const NEUTRAL: Viseme = Viseme::A;

    /// Parses an exact uppercase symbol of the closed alphabet, `None` for anything else.
    pub fn parse(symbol: &str) -> Option<Viseme> {
        Viseme::ALL.iter().copied().find(|v| v.symbol() == symbol)
    }

    /// Parses a symbol, resolving unknown ones to the neutral `A` shape.
    pub fn from_symbol(symbol: &str) -> Viseme {
        Viseme::parse(symbol).unwrap_or(Viseme::NEUTRAL)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Viseme::A => "A",
            Viseme::E => "E",
            Viseme::I => "I",
            Viseme::O => "O",
            Viseme::U => "U",
            Viseme::F => "F",
            Viseme::M => "M",
            Viseme::B => "B",
            Viseme::P => "P",
            Viseme::R => "R",
            Viseme::S => "S",
            Viseme::T => "T",
            Viseme::D => "D",
            Viseme::L => "L",
            Viseme::N => "N",
            Viseme::G => "G",
            Viseme::K => "K",
            Viseme::H => "H",
            Viseme::W => "W",
            Viseme::Y => "Y",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Viseme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl From<String> for Viseme {
    fn from(symbol: String) -> Self {
        Viseme::from_symbol(&symbol)
    }
}

impl From<Viseme> for String {
    fn from(viseme: Viseme) -> Self {
        viseme.symbol().to_string()
    }
}

/// Mouth-shape parameters of one viseme.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisemeShape {
    /// How open the mouth is, in `[0, 1]`.
    pub lip_openness: f32,
    pub lip_width_factor: f32,
    pub lip_height_factor: f32,
}

impl VisemeShape {
    pub const fn new(lip_openness: f32, lip_width_factor: f32, lip_height_factor: f32) -> Self {
        VisemeShape { lip_openness, lip_width_factor, lip_height_factor }
    }

    /// Vertical multiplier applied around the mouth centre.
    ///
    /// Shapes above `threshold` open the mouth (expand away from the centre),
    /// the rest close it (contract towards the centre).
    pub fn vertical_scale(&self, threshold: f32) -> f32 {
        if self.lip_openness > threshold {
            self.lip_height_factor * (1.0 + self.lip_openness)
        } else {
            self.lip_height_factor * (1.0 - self.lip_openness * 0.5)
        }
    }
}

/// Built-in shapes, in `Viseme::ALL` order.
const BUILTIN_SHAPES: [VisemeShape; VISEME_COUNT] = [
    VisemeShape::new(0.90, 1.10, 1.40), // A
    VisemeShape::new(0.50, 1.25, 1.05), // E
    VisemeShape::new(0.35, 1.30, 0.90), // I
    VisemeShape::new(0.80, 0.80, 1.35), // O
    VisemeShape::new(0.40, 0.70, 1.10), // U
    VisemeShape::new(0.20, 1.05, 0.80), // F
    VisemeShape::new(0.00, 1.00, 0.70), // M
    VisemeShape::new(0.00, 1.00, 0.72), // B
    VisemeShape::new(0.05, 0.98, 0.75), // P
    VisemeShape::new(0.35, 0.85, 1.00), // R
    VisemeShape::new(0.25, 1.15, 0.85), // S
    VisemeShape::new(0.30, 1.05, 0.90), // T
    VisemeShape::new(0.35, 1.05, 0.95), // D
    VisemeShape::new(0.45, 1.00, 1.05), // L
    VisemeShape::new(0.30, 1.02, 0.90), // N
    VisemeShape::new(0.55, 1.00, 1.10), // G
    VisemeShape::new(0.50, 1.00, 1.05), // K
    VisemeShape::new(0.60, 1.05, 1.15), // H
    VisemeShape::new(0.30, 0.75, 1.00), // W
    VisemeShape::new(0.40, 1.20, 0.95), // Y
];

/// Viseme to shape lookup.
///
/// Serializes as a map keyed by symbol. Deserializing starts from the
/// built-in table, so a config only needs to list the entries it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, VisemeShape>", into = "BTreeMap<String, VisemeShape>")]
pub struct VisemeShapeTable {
    shapes: [VisemeShape; VISEME_COUNT],
}

impl VisemeShapeTable {
    pub const fn builtin() -> Self {
        VisemeShapeTable { shapes: BUILTIN_SHAPES }
    }

    pub fn get(&self, viseme: Viseme) -> VisemeShape {
        self.shapes[viseme.index()]
    }

    /// Shape of a raw symbol; unknown symbols get the `A` shape.
    pub fn lookup(&self, symbol: &str) -> VisemeShape {
        self.get(Viseme::from_symbol(symbol))
    }

    pub fn with_shape(mut self, viseme: Viseme, shape: VisemeShape) -> Self {
        self.shapes[viseme.index()] = shape;
        self
    }
}

impl Default for VisemeShapeTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl From<BTreeMap<String, VisemeShape>> for VisemeShapeTable {
    fn from(overrides: BTreeMap<String, VisemeShape>) -> Self {
        let mut table = VisemeShapeTable::builtin();
        for (symbol, shape) in overrides {
            match Viseme::parse(&symbol) {
                Some(viseme) => table = table.with_shape(viseme, shape),
                None => warn!(symbol = %symbol, "viseme shape table - ignoring unknown symbol"),
            }
        }
        table
    }
}

impl From<VisemeShapeTable> for BTreeMap<String, VisemeShape> {
    fn from(table: VisemeShapeTable) -> Self {
        Viseme::ALL
            .iter()
            .map(|&viseme| (viseme.symbol().to_string(), table.get(viseme)))
            .collect()
    }
}

fn letter_viseme(letter: char) -> Viseme {
    match letter.to_ascii_lowercase() {
        'a' => Viseme::A,
        'e' => Viseme::E,
        'i' => Viseme::I,
        'o' => Viseme::O,
        'u' => Viseme::U,
        'f' | 'v' => Viseme::F,
        'm' => Viseme::M,
        'b' => Viseme::B,
        'p' => Viseme::P,
        'r' => Viseme::R,
        's' | 'z' | 'c' | 'x' => Viseme::S,
        't' => Viseme::T,
        'd' => Viseme::D,
        'l' => Viseme::L,
        'n' => Viseme::N,
        'g' | 'j' => Viseme::G,
        'k' | 'q' => Viseme::K,
        'h' => Viseme::H,
        'w' => Viseme::W,
        'y' => Viseme::Y,
        _ => Viseme::NEUTRAL,
    }
}

/// build_viseme_sequence paces `text` at roughly ten visemes per second.
///
/// This is a placeholder letter table, not phoneme alignment: every
/// alphabetic character becomes one viseme repeated `max(1, frame_rate / 10)`
/// times, and every other character becomes `frame_rate / 20` neutral frames
/// (none at all below 20 fps).
///
/// # Arguments
/// * `text` - text to articulate
/// * `frame_rate` - output frames per second
///
/// # Returns
/// * `Vec<Viseme>`
pub fn build_viseme_sequence(text: &str, frame_rate: u32) -> Vec<Viseme> {
    let letter_repeats = (frame_rate / 10).max(1) as usize;
    let pause_repeats = (frame_rate / 20) as usize;

    let mut sequence = Vec::new();
    for ch in text.chars() {
        if ch.is_alphabetic() {
            let viseme = letter_viseme(ch);
            sequence.extend(std::iter::repeat(viseme).take(letter_repeats));
        } else {
            sequence.extend(std::iter::repeat(Viseme::NEUTRAL).take(pause_repeats));
        }
    }
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_symbol_resolves_to_a() {
        let table = VisemeShapeTable::builtin();
        assert_eq!(Viseme::from_symbol("Q"), Viseme::A);
        assert_eq!(Viseme::from_symbol(""), Viseme::A);
        assert_eq!(Viseme::from_symbol("sil"), Viseme::A);
        assert_eq!(table.lookup("??"), table.get(Viseme::A));
        assert_eq!(Viseme::parse("x"), None);
    }

    #[test]
    fn test_symbols_match_exactly() {
        assert_eq!(Viseme::from_symbol("o"), Viseme::A);
        assert_eq!(Viseme::from_symbol(" M "), Viseme::A);
        assert_eq!(Viseme::parse("m"), None);
        assert_eq!(Viseme::parse("O"), Some(Viseme::O));
    }

    #[test]
    fn test_symbol_roundtrip_for_alphabet() {
        for viseme in Viseme::ALL {
            assert_eq!(Viseme::from_symbol(viseme.symbol()), viseme);
        }
    }

    #[test]
    fn test_builtin_shapes_in_range() {
        let table = VisemeShapeTable::builtin();
        for viseme in Viseme::ALL {
            let shape = table.get(viseme);
            assert!((0.0..=1.0).contains(&shape.lip_openness), "{viseme}");
            assert!((0.7..=1.5).contains(&shape.lip_width_factor), "{viseme}");
            assert!((0.7..=1.5).contains(&shape.lip_height_factor), "{viseme}");
        }
    }

    #[test]
    fn test_vertical_scale_branches() {
        let open = VisemeShape::new(0.8, 1.0, 1.0);
        assert!((open.vertical_scale(0.5) - 1.8).abs() < 1e-6);

        let closing = VisemeShape::new(0.4, 1.0, 1.0);
        assert!((closing.vertical_scale(0.5) - 0.8).abs() < 1e-6);

        // exactly at the threshold counts as closing
        let edge = VisemeShape::new(0.5, 1.0, 2.0);
        assert!((edge.vertical_scale(0.5) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_viseme_json_never_fails() {
        let visemes: Vec<Viseme> = serde_json::from_str(r#"["O","o","zz","M"]"#).unwrap();
        assert_eq!(visemes, vec![Viseme::O, Viseme::A, Viseme::A, Viseme::M]);
        assert_eq!(serde_json::to_string(&Viseme::W).unwrap(), r#""W""#);
    }

    #[test]
    fn test_shape_table_overrides() {
        let table: VisemeShapeTable = serde_json::from_str(
            r#"{"O":{"lip_openness":1.0,"lip_width_factor":0.7,"lip_height_factor":1.5},"??":{"lip_openness":0.0,"lip_width_factor":1.0,"lip_height_factor":1.0}}"#,
        ).unwrap();

        assert_eq!(table.get(Viseme::O), VisemeShape::new(1.0, 0.7, 1.5));
        assert_eq!(table.get(Viseme::A), VisemeShapeTable::builtin().get(Viseme::A));

        let encoded = serde_json::to_value(&table).unwrap();
        assert_eq!(encoded.as_object().unwrap().len(), VISEME_COUNT);
    }

    #[test]
    fn test_build_viseme_sequence_pacing() {
        let sequence = build_viseme_sequence("ma pa", 30);
        // 3 repeats per letter, 1 neutral frame for the space
        assert_eq!(sequence.len(), 4 * 3 + 1);
        assert_eq!(&sequence[0..3], &[Viseme::M; 3]);
        assert_eq!(&sequence[3..6], &[Viseme::A; 3]);
        assert_eq!(sequence[6], Viseme::A);
        assert_eq!(&sequence[7..10], &[Viseme::P; 3]);
    }

    #[test]
    fn test_build_viseme_sequence_low_frame_rate() {
        let sequence = build_viseme_sequence("hi, you", 5);
        // one frame per letter, pauses vanish below 20 fps
        assert_eq!(sequence, vec![Viseme::H, Viseme::I, Viseme::Y, Viseme::O, Viseme::U]);
        assert!(build_viseme_sequence("", 30).is_empty());
    }

    #[test]
    fn test_build_viseme_sequence_reserves_only_what_it_emits() {
        let sequence = build_viseme_sequence(&" ".repeat(10_000), 19);
        assert!(sequence.is_empty());
        assert_eq!(sequence.capacity(), 0);

        let sequence = build_viseme_sequence("a b", 1_000);
        assert_eq!(sequence.len(), 2 * 100 + 50);
    }
}
