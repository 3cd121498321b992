//! Text serialization of components, libraries, CRF states, and CRFs (spec
//! §4.6): a fixed-point log-scale integer encoding, tab-delimited body lines,
//! `//`-terminated records.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use ndarray::Array2;

use crate::{
    crf::{Crf, CrfState},
    error::{EngineError, Result},
    library::{ContextComponent, Library},
};

pub const K_LOG_SCALE: f64 = 1000.0;

/// `round(-log2(value) * kLogScale)`, or `"*"` for zero/non-positive values
/// (spec §4.6).
pub fn encode_log_score(value: f64) -> String {
    if value <= 0.0 {
        "*".to_string()
    } else {
        (-(value.log2()) * K_LOG_SCALE).round().to_string()
    }
}

/// Inverse of [`encode_log_score`]: `"*"` decodes to `0.0`.
pub fn decode_log_score(token: &str) -> Result<f64> {
    if token == "*" {
        return Ok(0.0);
    }
    let scaled: f64 = token
        .parse()
        .map_err(|_| EngineError::MalformedRecord(format!("expected integer token, got {token:?}")))?;
    Ok(2f64.powf(-scaled / K_LOG_SCALE))
}

/// Arbitrary signed reals (CRF bias/context-weight/pc-weight entries) are
/// not probabilities, so they scale directly rather than through
/// `-log2(value)` (DESIGN.md).
fn encode_signed(value: f64) -> String {
    (value * K_LOG_SCALE).round().to_string()
}

fn decode_signed(token: &str) -> Result<f64> {
    if token == "*" {
        return Ok(0.0);
    }
    let scaled: f64 = token
        .parse()
        .map_err(|_| EngineError::MalformedRecord(format!("expected integer token, got {token:?}")))?;
    Ok(scaled / K_LOG_SCALE)
}

fn read_line(reader: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(EngineError::TruncatedRecord);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Parses a profile row of the form `i\tv0\tv1\t...`, writing its decoded
/// entries into row `expected_i` of `profile` and erroring if the leading
/// column index is out of order.
fn parse_profile_row(line: &str, expected_i: usize, alphabet_size: usize, profile: &mut Array2<f64>) -> Result<()> {
    let mut parts = line.split('\t');
    let i: usize = parts
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| EngineError::MalformedRecord("malformed column index".into()))?;
    if i != expected_i {
        return Err(EngineError::MalformedRecord(format!(
            "column index out of order: expected {expected_i}, got {i}"
        )));
    }
    for a in 0..alphabet_size {
        let token = parts
            .next()
            .ok_or_else(|| EngineError::MalformedRecord("missing profile entry".into()))?;
        profile[[expected_i, a]] = decode_log_score(token)?;
    }
    Ok(())
}

fn read_key_value(reader: &mut impl BufRead, key: &str) -> Result<String> {
    let line = read_line(reader)?;
    let mut parts = line.splitn(2, '\t');
    let found_key = parts
        .next()
        .ok_or_else(|| EngineError::MalformedRecord(format!("expected key {key}")))?;
    if found_key != key {
        return Err(EngineError::MalformedRecord(format!(
            "expected key {key}, got {found_key}"
        )));
    }
    parts
        .next()
        .map(str::to_string)
        .ok_or_else(|| EngineError::MalformedRecord(format!("key {key} has no value")))
}

pub fn write_component(writer: &mut impl Write, component: &ContextComponent) -> Result<()> {
    let log_component = component.to_log_space();
    writeln!(writer, "Component")?;
    writeln!(writer, "PRIOR\t{}", encode_log_score(component.prior()))?;
    for a in 0..component.alphabet_size() {
        writeln!(writer, "PC\t{}\t{}", a, encode_log_score(component.pseudocounts()[a]))?;
    }
    for i in 0..component.window() {
        let mut fields = Vec::with_capacity(component.alphabet_size());
        for a in 0..component.alphabet_size() {
            fields.push(encode_log_score(2f64.powf(log_component.profile()[[i, a]])));
        }
        writeln!(writer, "{}\t{}", i, fields.join("\t"))?;
    }
    writeln!(writer, "//")?;
    Ok(())
}

pub fn read_component(reader: &mut impl BufRead, window: usize, alphabet_size: usize) -> Result<ContextComponent> {
    let tag = read_line(reader)?;
    if tag != "Component" {
        return Err(EngineError::MalformedRecord(format!("expected Component tag, got {tag}")));
    }
    let prior = decode_log_score(&read_key_value(reader, "PRIOR")?)?;
    let mut pseudocounts = vec![0.0; alphabet_size];
    for expected_a in 0..alphabet_size {
        let line = read_line(reader)?;
        let mut parts = line.splitn(3, '\t');
        let tag = parts.next().unwrap_or_default();
        if tag != "PC" {
            return Err(EngineError::MalformedRecord(format!("expected PC row, got {tag}")));
        }
        let a: usize = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| EngineError::MalformedRecord("malformed PC index".into()))?;
        if a != expected_a {
            return Err(EngineError::MalformedRecord(format!(
                "PC index out of order: expected {expected_a}, got {a}"
            )));
        }
        let value = parts
            .next()
            .ok_or_else(|| EngineError::MalformedRecord("PC row missing value".into()))?;
        pseudocounts[a] = decode_log_score(value)?;
    }

    let mut profile = Array2::zeros((window, alphabet_size));
    for expected_i in 0..window {
        let line = read_line(reader)?;
        parse_profile_row(&line, expected_i, alphabet_size, &mut profile)?;
    }
    let terminator = read_line(reader)?;
    if terminator != "//" {
        return Err(EngineError::TruncatedRecord);
    }
    ContextComponent::new(profile.mapv(f64::log2), prior, pseudocounts, true)
}

pub fn write_library(writer: &mut impl Write, library: &Library, iterations: u64) -> Result<()> {
    writeln!(writer, "ProfileLibrary")?;
    writeln!(writer, "NUM_PROFILES\t{}", library.num_components())?;
    writeln!(writer, "NUM_COLS\t{}", library.window())?;
    writeln!(writer, "ITERATIONS\t{iterations}")?;
    writeln!(writer, "LOGSPACE\t{}", library.is_log_space() as u8)?;
    for component in library.components() {
        write_component(writer, component)?;
    }
    Ok(())
}

pub fn read_library(reader: &mut impl BufRead) -> Result<Library> {
    let tag = read_line(reader)?;
    if tag != "ProfileLibrary" {
        return Err(EngineError::MalformedRecord(format!(
            "expected ProfileLibrary tag, got {tag}"
        )));
    }
    let num_profiles: usize = read_key_value(reader, "NUM_PROFILES")?
        .parse()
        .map_err(|_| EngineError::MalformedRecord("malformed NUM_PROFILES".into()))?;
    let num_cols: usize = read_key_value(reader, "NUM_COLS")?
        .parse()
        .map_err(|_| EngineError::MalformedRecord("malformed NUM_COLS".into()))?;
    let _iterations: u64 = read_key_value(reader, "ITERATIONS")?
        .parse()
        .map_err(|_| EngineError::MalformedRecord("malformed ITERATIONS".into()))?;
    let _logspace: u8 = read_key_value(reader, "LOGSPACE")?
        .parse()
        .map_err(|_| EngineError::MalformedRecord("malformed LOGSPACE".into()))?;

    let first = read_component_peeking_alphabet(reader, num_cols)?;
    let alphabet_size = first.alphabet_size();
    let mut components = vec![first];
    for _ in 1..num_profiles {
        components.push(read_component(reader, num_cols, alphabet_size)?);
    }
    if components.len() != num_profiles {
        return Err(EngineError::ComponentCountMismatch {
            declared: num_profiles,
            found: components.len(),
        });
    }
    Library::new(components)
}

/// The alphabet size isn't in the library header, so the first component is
/// parsed by reading PC rows (tagged `"PC"`) until a line shaped like a
/// profile row (a bare leading numeric column index) appears, rather than by
/// watching the running pseudocount sum approach 1 — a one-hot or other
/// near-delta pseudocount vector would cross that threshold after a single
/// entry and silently truncate the alphabet.
fn read_component_peeking_alphabet(reader: &mut impl BufRead, window: usize) -> Result<ContextComponent> {
    let tag = read_line(reader)?;
    if tag != "Component" {
        return Err(EngineError::MalformedRecord(format!("expected Component tag, got {tag}")));
    }
    let prior = decode_log_score(&read_key_value(reader, "PRIOR")?)?;
    let mut pseudocounts = Vec::new();
    let first_profile_line = loop {
        let line = read_line(reader)?;
        let mut parts = line.splitn(3, '\t');
        let tag = parts.next().unwrap_or_default();
        if tag == "PC" {
            let value = parts
                .next_back()
                .ok_or_else(|| EngineError::MalformedRecord("PC row missing value".into()))?;
            pseudocounts.push(decode_log_score(value)?);
        } else {
            break line;
        }
    };
    if pseudocounts.is_empty() {
        return Err(EngineError::MalformedRecord("component has no PC rows".into()));
    }
    let alphabet_size = pseudocounts.len();

    let mut profile = Array2::zeros((window, alphabet_size));
    parse_profile_row(&first_profile_line, 0, alphabet_size, &mut profile)?;
    for expected_i in 1..window {
        let line = read_line(reader)?;
        parse_profile_row(&line, expected_i, alphabet_size, &mut profile)?;
    }
    let terminator = read_line(reader)?;
    if terminator != "//" {
        return Err(EngineError::TruncatedRecord);
    }
    ContextComponent::new(profile.mapv(f64::log2), prior, pseudocounts, true)
}

pub fn write_crf_state(writer: &mut impl Write, state: &CrfState) -> Result<()> {
    writeln!(writer, "CrfState")?;
    writeln!(writer, "BIAS\t{}", encode_signed(state.bias()))?;
    for i in 0..state.window() {
        let mut fields = Vec::with_capacity(state.alphabet_size());
        for a in 0..state.alphabet_size() {
            fields.push(encode_signed(state.context_weights()[[i, a]]));
        }
        writeln!(writer, "{}\t{}", i, fields.join("\t"))?;
    }
    let pc_fields: Vec<String> = state.pc_weights().iter().map(|&v| encode_signed(v)).collect();
    writeln!(writer, "PC\t{}", pc_fields.join("\t"))?;
    writeln!(writer, "//")?;
    Ok(())
}

pub fn read_crf_state(reader: &mut impl BufRead, window: usize, alphabet_size: usize) -> Result<CrfState> {
    let tag = read_line(reader)?;
    if tag != "CrfState" {
        return Err(EngineError::MalformedRecord(format!("expected CrfState tag, got {tag}")));
    }
    let bias = decode_signed(&read_key_value(reader, "BIAS")?)?;
    let mut context_weights = Array2::zeros((window, alphabet_size));
    for expected_i in 0..window {
        let line = read_line(reader)?;
        let mut parts = line.split('\t');
        let i: usize = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| EngineError::MalformedRecord("malformed column index".into()))?;
        if i != expected_i {
            return Err(EngineError::MalformedRecord(format!(
                "column index out of order: expected {expected_i}, got {i}"
            )));
        }
        for a in 0..alphabet_size {
            let token = parts
                .next()
                .ok_or_else(|| EngineError::MalformedRecord("missing context weight entry".into()))?;
            context_weights[[i, a]] = decode_signed(token)?;
        }
    }
    let pc_line = read_line(reader)?;
    let mut pc_parts = pc_line.split('\t');
    let pc_tag = pc_parts.next().unwrap_or_default();
    if pc_tag != "PC" {
        return Err(EngineError::MalformedRecord(format!("expected PC row, got {pc_tag}")));
    }
    let pc_weights: Result<Vec<f64>> = pc_parts.map(decode_signed).collect();
    let pc_weights = pc_weights?;
    if pc_weights.len() != alphabet_size {
        return Err(EngineError::ShapeMismatch {
            what: "pc_weights",
            rows: pc_weights.len(),
            cols: 1,
            expected_rows: alphabet_size,
            expected_cols: 1,
        });
    }
    let terminator = read_line(reader)?;
    if terminator != "//" {
        return Err(EngineError::TruncatedRecord);
    }
    CrfState::new(bias, context_weights, pc_weights)
}

pub fn write_crf(writer: &mut impl Write, crf: &Crf, index: u64) -> Result<()> {
    writeln!(writer, "Crf")?;
    writeln!(writer, "INDEX\t{index}")?;
    writeln!(writer, "NSTATES\t{}", crf.num_states())?;
    writeln!(writer, "NCOLS\t{}", crf.window())?;
    writeln!(writer, "ALPH\t{}", crf.alphabet_size())?;
    for state in crf.states() {
        write_crf_state(writer, state)?;
    }
    Ok(())
}

pub fn read_crf(reader: &mut impl BufRead) -> Result<Crf> {
    let tag = read_line(reader)?;
    if tag != "Crf" {
        return Err(EngineError::MalformedRecord(format!("expected Crf tag, got {tag}")));
    }
    let _index: u64 = read_key_value(reader, "INDEX")?
        .parse()
        .map_err(|_| EngineError::MalformedRecord("malformed INDEX".into()))?;
    let num_states: usize = read_key_value(reader, "NSTATES")?
        .parse()
        .map_err(|_| EngineError::MalformedRecord("malformed NSTATES".into()))?;
    let window: usize = read_key_value(reader, "NCOLS")?
        .parse()
        .map_err(|_| EngineError::MalformedRecord("malformed NCOLS".into()))?;
    let alphabet_size: usize = read_key_value(reader, "ALPH")?
        .parse()
        .map_err(|_| EngineError::MalformedRecord("malformed ALPH".into()))?;

    let mut states = Vec::with_capacity(num_states);
    for _ in 0..num_states {
        states.push(read_crf_state(reader, window, alphabet_size)?);
    }
    if states.len() != num_states {
        return Err(EngineError::ComponentCountMismatch {
            declared: num_states,
            found: states.len(),
        });
    }
    Crf::new(states)
}

/// Loads a library from a file path, the engine's file-based public
/// boundary: I/O faults and parse faults are both surfaced as a single
/// reportable `eyre::Report` rather than requiring the caller to match on
/// `EngineError`.
pub fn load_library_from_path(path: &Path) -> eyre::Result<Library> {
    let mut reader = BufReader::new(File::open(path)?);
    Ok(read_library(&mut reader)?)
}

pub fn save_library_to_path(path: &Path, library: &Library, iterations: u64) -> eyre::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_library(&mut writer, library, iterations)?;
    Ok(())
}

pub fn load_crf_from_path(path: &Path) -> eyre::Result<Crf> {
    let mut reader = BufReader::new(File::open(path)?);
    Ok(read_crf(&mut reader)?)
}

pub fn save_crf_to_path(path: &Path, crf: &Crf, index: u64) -> eyre::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_crf(&mut writer, crf, index)?;
    Ok(())
}
