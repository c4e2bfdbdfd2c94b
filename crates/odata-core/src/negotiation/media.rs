//! Media types, `Accept` ranges and `$format` values.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub main: String,
    pub sub: String,
    /// Parameters in declaration order, names lowercased.
    pub params: Vec<(String, String)>,
}

impl MediaType {
    pub fn new(main: &str, sub: &str) -> Self {
        Self {
            main: main.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// `type/subtype` without parameters.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main, self.sub)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// How precisely this range names `other`: 3 exact, 2 `type/*`, 1 `*/*`,
    /// 0 no match.
    pub fn specificity_for(&self, other: &MediaType) -> u32 {
        if self.main == "*" && self.sub == "*" {
            1
        } else if self.main == other.main && self.sub == "*" {
            2
        } else if self.main == other.main && self.sub == other.sub {
            3
        } else {
            0
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.main == "multipart"
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let (main, sub) = essence
            .split_once('/')
            .ok_or_else(|| format!("'{essence}' is not a media type"))?;
        let (main, sub) = (main.trim(), sub.trim());
        if main.is_empty() || sub.is_empty() || (main == "*" && sub != "*") {
            return Err(format!("'{essence}' is not a media type"));
        }
        let mut media = MediaType::new(main, sub);
        for param in parts {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let (name, value) = param
                .split_once('=')
                .ok_or_else(|| format!("malformed media type parameter '{param}'"))?;
            media.params.push((
                name.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            ));
        }
        Ok(media)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main, self.sub)?;
        for (name, value) in &self.params {
            write!(f, ";{name}={value}")?;
        }
        Ok(())
    }
}

/// One entry of an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    pub media: MediaType,
    pub quality: f32,
}

impl MediaRange {
    pub fn any() -> Self {
        Self {
            media: MediaType::new("*", "*"),
            quality: 1.0,
        }
    }
}

/// Parse an `Accept` header. Unparseable entries are skipped; an empty
/// header accepts anything.
pub fn parse_accept(header: &str) -> Vec<MediaRange> {
    let mut ranges = Vec::new();
    for entry in header.split(',') {
        let Ok(mut media) = entry.parse::<MediaType>() else {
            continue;
        };
        let mut quality = 1.0;
        if let Some(pos) = media.params.iter().position(|(n, _)| n == "q") {
            let (_, q) = media.params.remove(pos);
            quality = q.parse::<f32>().unwrap_or(0.0).clamp(0.0, 1.0);
        }
        ranges.push(MediaRange { media, quality });
    }
    if ranges.is_empty() {
        ranges.push(MediaRange::any());
    }
    ranges
}

/// Media type requested through `$format`. Short names map to their
/// canonical types; anything else must itself be a media type.
pub fn format_media_type(format: &str) -> Option<MediaType> {
    match format.to_ascii_lowercase().as_str() {
        "json" => Some(MediaType::new("application", "json")),
        "xml" => Some(MediaType::new("application", "xml")),
        "atom" => Some(MediaType::new("application", "atom+xml")),
        _ => format.parse().ok(),
    }
}

/// Acceptance weight of `offered` under `ranges`; 0 means not acceptable.
///
/// The most specific matching range decides the quality (first one wins
/// among equally specific ranges). Higher quality dominates, specificity
/// breaks ties between qualities.
pub fn acceptance(ranges: &[MediaRange], offered: &MediaType) -> u32 {
    let mut best: Option<(u32, f32)> = None;
    for range in ranges {
        let specificity = range.media.specificity_for(offered);
        if specificity == 0 {
            continue;
        }
        if best.is_none_or(|(s, _)| specificity > s) {
            best = Some((specificity, range.quality));
        }
    }
    match best {
        Some((specificity, quality)) if quality > 0.0 => {
            (quality * 1000.0).round() as u32 * 4 + specificity
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json() -> MediaType {
        MediaType::new("application", "json")
    }

    #[test]
    fn parses_parameters() {
        let media: MediaType = "Application/JSON; odata.metadata=minimal; charset=\"utf-8\""
            .parse()
            .unwrap();
        assert_eq!(media.essence(), "application/json");
        assert_eq!(media.param("charset"), Some("utf-8"));
        assert_eq!(media.to_string(), "application/json;odata.metadata=minimal;charset=utf-8");
        assert!("json".parse::<MediaType>().is_err());
        assert!("*/json".parse::<MediaType>().is_err());
    }

    #[test]
    fn accept_quality_and_wildcards() {
        let ranges = parse_accept("text/plain;q=0.5, application/*;q=0.8, */*;q=0.1");
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].quality, 0.5);
        assert!(ranges[0].media.params.is_empty());

        let json_score = acceptance(&ranges, &json());
        let text_score = acceptance(&ranges, &MediaType::new("text", "plain"));
        let image_score = acceptance(&ranges, &MediaType::new("image", "png"));
        assert!(json_score > text_score);
        assert!(text_score > image_score);
        assert!(image_score > 0);
    }

    #[test]
    fn most_specific_range_decides() {
        let ranges = parse_accept("application/*, application/xml;q=0");
        assert_eq!(acceptance(&ranges, &MediaType::new("application", "xml")), 0);
        assert!(acceptance(&ranges, &json()) > 0);
    }

    #[test]
    fn empty_accept_takes_anything() {
        let ranges = parse_accept("");
        assert_eq!(ranges, vec![MediaRange::any()]);
        assert_eq!(acceptance(&ranges, &json()), 4001);
    }

    #[test]
    fn format_short_names() {
        assert_eq!(format_media_type("json"), Some(json()));
        assert_eq!(format_media_type("atom").unwrap().essence(), "application/atom+xml");
        assert_eq!(format_media_type("text/csv").unwrap().essence(), "text/csv");
        assert_eq!(format_media_type("csv"), None);
    }
}
