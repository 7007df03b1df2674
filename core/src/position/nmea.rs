//! Minimal NMEA 0183 reader for GGA (fix data) sentences.

/// Index of the altitude field in a GGA sentence; fewer fields is malformed.
const GGA_MIN_FIELDS: usize = 10;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NmeaError {
    #[error("sentence does not start with '$'")]
    MissingStart,
    #[error("checksum field '{0}' is not hex")]
    BadChecksumField(String),
    #[error("checksum mismatch: sentence says {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },
    #[error("GGA sentence has {0} fields")]
    TooFewFields(usize),
    #[error("invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },
}

/// Position-bearing content of a GGA sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaSentence {
    pub talker: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub quality: u8,
    pub satellites: u8,
    pub altitude_m: Option<f64>,
}

/// Parses one sentence. Well-formed sentences other than GGA yield `Ok(None)`.
pub fn parse_sentence(line: &str) -> Result<Option<GgaSentence>, NmeaError> {
    let line = line.trim();
    let body = line.strip_prefix('$').ok_or(NmeaError::MissingStart)?;

    let body = match body.split_once('*') {
        Some((content, checksum)) => {
            let expected = u8::from_str_radix(checksum.trim(), 16)
                .map_err(|_| NmeaError::BadChecksumField(checksum.to_string()))?;
            let computed = checksum_of(content);
            if expected != computed {
                return Err(NmeaError::Checksum { expected, computed });
            }
            content
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let address = fields[0];
    if address.len() < 5 || !address.ends_with("GGA") {
        return Ok(None);
    }
    if fields.len() < GGA_MIN_FIELDS {
        return Err(NmeaError::TooFewFields(fields.len()));
    }

    let latitude = parse_coordinate(fields[2], fields[3], 'N', 'S', "latitude")?;
    let longitude = parse_coordinate(fields[4], fields[5], 'E', 'W', "longitude")?;
    let quality = parse_optional::<u8>(fields[6], "fix quality")?.unwrap_or(0);
    let satellites = parse_optional::<u8>(fields[7], "satellite count")?.unwrap_or(0);
    let altitude_m = parse_optional::<f64>(fields[9], "altitude")?;

    Ok(Some(GgaSentence {
        talker: address[..address.len() - 3].to_string(),
        latitude,
        longitude,
        quality,
        satellites,
        altitude_m,
    }))
}

/// XOR of every byte between `$` and `*`.
pub fn checksum_of(content: &str) -> u8 {
    content.bytes().fold(0u8, |acc, b| acc ^ b)
}

fn parse_optional<T: std::str::FromStr>(
    value: &str,
    field: &'static str,
) -> Result<Option<T>, NmeaError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<T>()
        .map(Some)
        .map_err(|_| NmeaError::InvalidField {
            field,
            value: value.to_string(),
        })
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere to signed decimal degrees.
fn parse_coordinate(
    value: &str,
    hemisphere: &str,
    positive: char,
    negative: char,
    field: &'static str,
) -> Result<Option<f64>, NmeaError> {
    let raw = match parse_optional::<f64>(value, field)? {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if !(0.0..60.0).contains(&minutes) {
        return Err(NmeaError::InvalidField {
            field,
            value: value.to_string(),
        });
    }
    let magnitude = degrees + minutes / 60.0;

    match hemisphere.trim().chars().next() {
        Some(c) if c == positive => Ok(Some(magnitude)),
        Some(c) if c == negative => Ok(Some(-magnitude)),
        _ => Err(NmeaError::InvalidField {
            field: "hemisphere",
            value: hemisphere.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) fn with_checksum(content: &str) -> String {
    format!("${}*{:02X}", content, checksum_of(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_gga_sentence() {
        let line = with_checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        let gga = parse_sentence(&line).unwrap().unwrap();
        assert_eq!(gga.talker, "GP");
        assert!((gga.latitude.unwrap() - 48.1173).abs() < 1e-9);
        assert!((gga.longitude.unwrap() - 11.516_666_666).abs() < 1e-6);
        assert_eq!(gga.quality, 1);
        assert_eq!(gga.satellites, 8);
        assert_eq!(gga.altitude_m, Some(545.4));
    }

    #[test]
    fn southern_and_western_hemispheres_are_negative() {
        let line = with_checksum("GNGGA,000000,3352.000,S,15112.000,W,1,05,1.0,10.0,M,,M,,");
        let gga = parse_sentence(&line).unwrap().unwrap();
        assert!((gga.latitude.unwrap() + 33.866_666).abs() < 1e-5);
        assert!((gga.longitude.unwrap() + 151.2).abs() < 1e-9);
    }

    #[test]
    fn empty_position_fields_yield_no_coordinates() {
        let line = with_checksum("GPGGA,000000,,,,,0,00,,,M,,M,,");
        let gga = parse_sentence(&line).unwrap().unwrap();
        assert_eq!(gga.latitude, None);
        assert_eq!(gga.longitude, None);
        assert_eq!(gga.altitude_m, None);
    }

    #[test]
    fn other_sentences_are_ignored() {
        let line = with_checksum("GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W");
        assert_eq!(parse_sentence(&line).unwrap(), None);
    }

    #[test]
    fn corrupted_sentences_are_errors() {
        let mut line = with_checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        line = line.replace("4807", "4808");
        assert!(matches!(parse_sentence(&line), Err(NmeaError::Checksum { .. })));
        assert_eq!(parse_sentence("GPGGA,1"), Err(NmeaError::MissingStart));
        assert!(matches!(
            parse_sentence("$GPGGA,123519,4807.038,N"),
            Err(NmeaError::TooFewFields(4))
        ));
        assert!(matches!(
            parse_sentence("$GPGGA,123519,48x7.038,N,01131.000,E,1,08,0.9,545.4,M"),
            Err(NmeaError::InvalidField { field: "latitude", .. })
        ));
    }
}
