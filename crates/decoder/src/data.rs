//! JSON configuration data: opcode dispatch and instrument tables

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::errors::{ConfigError, DeserializeError};
use crate::ir::InstrumentContext;

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub const MAX_OPERAND_COUNT: u8 = 4;

/// Closed set of opcode semantics.
///
/// Externally-supplied dispatch tables name these with strings; unknown
/// strings are rejected at load time, never silently ignored.
#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String")]
pub enum OpcodeSemantic {
    Tempo,
    TempoFade,
    PatchChange,
    OctaveSet,
    OctaveInc,
    OctaveDec,
    Volume,
    VolumeFade,
    Pan,
    PanFade,
    SlurOn,
    SlurOff,
    RollOn,
    RollOff,
    Staccato,
    UtilityDuration,
    MasterVolume,
    VolumeMultiplier,
    PercussionOn,
    PercussionOff,
    LoopStart,
    LoopEnd,
    LoopBreak,
    LoopMark,
    Goto,
    Halt,
    Envelope,
    Nop,
}

impl OpcodeSemantic {
    /// Also used as the disassembly mnemonic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tempo => "tempo",
            Self::TempoFade => "tempo_fade",
            Self::PatchChange => "patch_change",
            Self::OctaveSet => "octave_set",
            Self::OctaveInc => "octave_inc",
            Self::OctaveDec => "octave_dec",
            Self::Volume => "volume",
            Self::VolumeFade => "volume_fade",
            Self::Pan => "pan",
            Self::PanFade => "pan_fade",
            Self::SlurOn => "slur_on",
            Self::SlurOff => "slur_off",
            Self::RollOn => "roll_on",
            Self::RollOff => "roll_off",
            Self::Staccato => "staccato",
            Self::UtilityDuration => "utility_duration",
            Self::MasterVolume => "master_volume",
            Self::VolumeMultiplier => "volume_multiplier",
            Self::PercussionOn => "percussion_on",
            Self::PercussionOff => "percussion_off",
            Self::LoopStart => "loop_start",
            Self::LoopEnd => "loop_end",
            Self::LoopBreak => "loop_break",
            Self::LoopMark => "loop_mark",
            Self::Goto => "goto",
            Self::Halt => "halt",
            Self::Envelope => "envelope",
            Self::Nop => "nop",
        }
    }

    const ALL: [OpcodeSemantic; 28] = [
        Self::Tempo,
        Self::TempoFade,
        Self::PatchChange,
        Self::OctaveSet,
        Self::OctaveInc,
        Self::OctaveDec,
        Self::Volume,
        Self::VolumeFade,
        Self::Pan,
        Self::PanFade,
        Self::SlurOn,
        Self::SlurOff,
        Self::RollOn,
        Self::RollOff,
        Self::Staccato,
        Self::UtilityDuration,
        Self::MasterVolume,
        Self::VolumeMultiplier,
        Self::PercussionOn,
        Self::PercussionOff,
        Self::LoopStart,
        Self::LoopEnd,
        Self::LoopBreak,
        Self::LoopMark,
        Self::Goto,
        Self::Halt,
        Self::Envelope,
        Self::Nop,
    ];
}

impl FromStr for OpcodeSemantic {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|sem| sem.as_str() == s)
            .copied()
            .ok_or_else(|| ConfigError::UnknownSemantic(s.to_owned()))
    }
}

impl TryFrom<String> for OpcodeSemantic {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Special operand interpretation applied on top of a semantic.
#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecialHandler {
    /// The value operand is stored halved in the sequence data.
    DoubleValue,
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct OpcodeDef {
    pub semantic: OpcodeSemantic,

    /// Fixed operand byte count.
    #[serde(default)]
    pub operands: u8,

    /// Which operand byte carries the semantic value.
    #[serde(default)]
    pub value_index: Option<u8>,

    #[serde(default)]
    pub special: Option<SpecialHandler>,
}

impl OpcodeDef {
    pub const fn new(semantic: OpcodeSemantic, operands: u8) -> Self {
        Self {
            semantic,
            operands,
            value_index: None,
            special: None,
        }
    }

    pub const fn with_value_index(mut self, index: u8) -> Self {
        self.value_index = Some(index);
        self
    }

    pub const fn with_special(mut self, special: SpecialHandler) -> Self {
        self.special = Some(special);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.operands > MAX_OPERAND_COUNT {
            return Err(ConfigError::OperandCountTooLarge(self.operands));
        }
        if let Some(vi) = self.value_index {
            if vi >= self.operands {
                return Err(ConfigError::ValueIndexOutOfRange(vi, self.operands));
            }
        }
        Ok(())
    }
}

/// Hex or decimal opcode byte used as a JSON map key (`"0xc4"` or `"196"`).
#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String")]
struct OpcodeByte(u8);

impl TryFrom<String> for OpcodeByte {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => s.parse(),
        };

        match parsed {
            Ok(b) => Ok(OpcodeByte(b)),
            Err(_) => Err(ConfigError::InvalidOpcodeByte(s)),
        }
    }
}

/// Per-format opcode dispatch table: opcode byte → decode rule.
#[derive(Deserialize, Debug, Clone)]
#[serde(try_from = "HashMap<OpcodeByte, OpcodeDef>")]
pub struct DispatchTable {
    entries: HashMap<u8, OpcodeDef>,
}

impl DispatchTable {
    pub fn get(&self, opcode: u8) -> Option<&OpcodeDef> {
        self.entries.get(&opcode)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_entries(entries: &[(u8, OpcodeDef)]) -> Result<Self, ConfigError> {
        Self::try_new(entries.iter().copied().collect())
    }

    fn try_new(entries: HashMap<u8, OpcodeDef>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyDispatchTable);
        }
        for def in entries.values() {
            def.validate()?;
        }
        Ok(Self { entries })
    }
}

impl TryFrom<HashMap<OpcodeByte, OpcodeDef>> for DispatchTable {
    type Error = ConfigError;

    fn try_from(map: HashMap<OpcodeByte, OpcodeDef>) -> Result<Self, Self::Error> {
        Self::try_new(map.into_iter().map(|(k, v)| (k.0, v)).collect())
    }
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct InstrumentEntry {
    /// General MIDI program. Negative values encode a percussion key.
    pub program: i16,

    #[serde(default)]
    pub transpose_octaves: i8,
}

impl InstrumentEntry {
    fn context(&self) -> InstrumentContext {
        InstrumentContext {
            program: self.program,
            transpose_octaves: self.transpose_octaves,
        }
    }
}

/// Per-song instrument table: instrument index → GM mapping.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct InstrumentMap {
    entries: Vec<InstrumentEntry>,
}

impl InstrumentMap {
    pub fn from_entries(entries: Vec<InstrumentEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, index: u8) -> Option<InstrumentContext> {
        self.entries.get(usize::from(index)).map(|e| e.context())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Percussion-mode table: note class → GM mapping (usually percussion keys).
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct PercussionMap {
    entries: Vec<InstrumentEntry>,
}

impl PercussionMap {
    pub fn from_entries(entries: Vec<InstrumentEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, index: u8) -> Option<InstrumentContext> {
        self.entries.get(usize::from(index)).map(|e| e.context())
    }
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DeserializeError> {
    let file_name = path
        .file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .to_string();

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return Err(DeserializeError::OpenError(file_name, e)),
    };
    let reader = BufReader::new(file);

    match serde_json::from_reader(reader) {
        Ok(t) => Ok(t),
        Err(e) => Err(DeserializeError::SerdeError(file_name, e)),
    }
}

pub fn load_dispatch_file(path: &Path) -> Result<DispatchTable, DeserializeError> {
    load_json_file(path)
}

pub fn load_instrument_file(path: &Path) -> Result<InstrumentMap, DeserializeError> {
    load_json_file(path)
}

pub fn load_percussion_file(path: &Path) -> Result<PercussionMap, DeserializeError> {
    load_json_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_round_trip() {
        for sem in OpcodeSemantic::ALL {
            assert_eq!(sem.as_str().parse::<OpcodeSemantic>().unwrap(), sem);
        }
    }

    #[test]
    fn unknown_semantic_fails_fast() {
        let e = "volume_fade_typo".parse::<OpcodeSemantic>().unwrap_err();
        assert!(matches!(e, ConfigError::UnknownSemantic(_)));

        let json = r#"{ "0xe0": { "semantic": "no_such_semantic" } }"#;
        assert!(serde_json::from_str::<DispatchTable>(json).is_err());
    }

    #[test]
    fn dispatch_table_from_json() {
        let json = r#"{
            "0xe0": { "semantic": "tempo", "operands": 1, "value_index": 0 },
            "0xe1": { "semantic": "goto", "operands": 2 },
            "250":  { "semantic": "halt" }
        }"#;
        let table: DispatchTable = serde_json::from_str(json).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0xe0).unwrap().semantic, OpcodeSemantic::Tempo);
        assert_eq!(table.get(0xfa).unwrap().semantic, OpcodeSemantic::Halt);
        assert_eq!(table.get(0x42), None);
    }

    #[test]
    fn value_index_validated() {
        let json = r#"{ "0xe0": { "semantic": "tempo", "operands": 1, "value_index": 1 } }"#;
        assert!(serde_json::from_str::<DispatchTable>(json).is_err());
    }
}
