use gnss_ice::prelude::{
    Constellation, Epoch, Error, Observation, ObservationStream, Vector3, SV,
};

use std::fs::read_to_string;
use std::str::FromStr;

/// Parses one satellite identity: either "G05" or a GPS PRN number.
fn parse_sv(content: &str) -> Option<SV> {
    if let Ok(sv) = SV::from_str(content) {
        return Some(sv);
    }
    let prn = content.parse::<u8>().ok()?;
    Some(SV::new(Constellation::GPS, prn))
}

/// Parses one record:
/// `time key prn x y z rho range phase break`,
/// time is expressed in GPST seconds, distances in meters.
fn parse_record(line: usize, content: &str) -> Result<Observation, Error> {
    let malformed = |reason: &str| Error::MalformedRecord(line, reason.to_string());

    let items = content.split_ascii_whitespace().collect::<Vec<_>>();
    if items.len() != 10 {
        return Err(malformed("expecting 10 fields"));
    }

    let float = |index: usize, name: &str| {
        items[index]
            .parse::<f64>()
            .map_err(|_| malformed(&format!("invalid {}", name)))
    };

    let t = float(0, "time")?;
    let key = items[1]
        .parse::<u32>()
        .map_err(|_| malformed("invalid key"))?;
    let sv = parse_sv(items[2]).ok_or_else(|| malformed("invalid satellite"))?;
    let sat_ecef = Vector3::new(float(3, "x")?, float(4, "y")?, float(5, "z")?);
    let arc = items[9]
        .parse::<i32>()
        .map_err(|_| malformed("invalid arc indicator"))?;

    Ok(Observation {
        t: Epoch::from_gpst_seconds(t),
        key,
        sv,
        sat_ecef,
        rho: float(6, "rho")?,
        pseudo_range: float(7, "range")?,
        phase_range: float(8, "phase")?,
        arc,
    })
}

/// Loads the whole observation file. Blank lines and
/// lines starting with '#' are ignored.
pub fn load(path: &str) -> Result<ObservationStream, Error> {
    let content = read_to_string(path)
        .map_err(|e| Error::UnreadableStream(format!("{}: {}", path, e)))?;

    let mut observations = Vec::with_capacity(1024);

    for (index, line) in content.lines().enumerate() {
        let line_trimmed = line.trim();
        if line_trimmed.is_empty() || line_trimmed.starts_with('#') {
            continue;
        }
        observations.push(parse_record(index + 1, line_trimmed)?);
    }

    ObservationStream::new(observations)
}
