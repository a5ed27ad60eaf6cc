//! Interprétation de l'en-tête HTTP `Range`
//!
//! Seule l'unité `bytes` avec une plage unique est prise en charge. Un en-tête
//! mal formé ou multi-plages est ignoré : le fichier est servi en entier.

/// Plage d'octets inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Nombre d'octets couverts
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Valeur de l'en-tête `Content-Range`
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Décision à prendre pour une requête
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// Réponse 200 avec le fichier complet
    Full,
    /// Réponse 206
    Partial(ByteRange),
    /// Réponse 416
    Unsatisfiable,
}

/// Analyse l'en-tête `Range` pour un fichier de `total` octets
pub fn parse_range(header: Option<&str>, total: u64) -> RangeRequest {
    let Some(header) = header else {
        return RangeRequest::Full;
    };

    let header = header.trim();
    let Some((unit, ranges)) = header.split_once('=') else {
        return RangeRequest::Full;
    };
    if !unit.trim().eq_ignore_ascii_case("bytes") || ranges.contains(',') {
        return RangeRequest::Full;
    }
    let Some((start, end)) = ranges.trim().split_once('-') else {
        return RangeRequest::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    // Forme suffixe : bytes=-N
    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if suffix == 0 || total == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Partial(ByteRange {
            start: total.saturating_sub(suffix),
            end: total - 1,
        });
    }

    let Ok(start) = start.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return RangeRequest::Full,
        }
    };

    if start >= total {
        return RangeRequest::Unsatisfiable;
    }

    let last = total - 1;
    RangeRequest::Partial(ByteRange {
        start,
        end: end.map_or(last, |e| e.min(last)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(start: u64, end: u64) -> RangeRequest {
        RangeRequest::Partial(ByteRange { start, end })
    }

    #[test]
    fn test_no_header_is_full() {
        assert_eq!(parse_range(None, 1000), RangeRequest::Full);
    }

    #[test]
    fn test_explicit_range() {
        let r = parse_range(Some("bytes=100-199"), 1000);
        assert_eq!(r, partial(100, 199));
        if let RangeRequest::Partial(r) = r {
            assert_eq!(r.len(), 100);
            assert_eq!(r.content_range(1000), "bytes 100-199/1000");
        }
    }

    #[test]
    fn test_open_and_clamped_ranges() {
        assert_eq!(parse_range(Some("bytes=500-"), 1000), partial(500, 999));
        assert_eq!(parse_range(Some("bytes=900-5000"), 1000), partial(900, 999));
        assert_eq!(parse_range(Some("bytes=0-0"), 1000), partial(0, 0));
    }

    #[test]
    fn test_suffix_ranges() {
        assert_eq!(parse_range(Some("bytes=-100"), 1000), partial(900, 999));
        assert_eq!(parse_range(Some("bytes=-5000"), 1000), partial(0, 999));
        assert_eq!(parse_range(Some("bytes=-0"), 1000), RangeRequest::Unsatisfiable);
    }

    #[test]
    fn test_unsatisfiable() {
        assert_eq!(parse_range(Some("bytes=1000-"), 1000), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=2000-3000"), 1000), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=0-"), 0), RangeRequest::Unsatisfiable);
    }

    #[test]
    fn test_malformed_is_ignored() {
        for header in [
            "bytes=abc-def",
            "bytes=200-100",
            "items=0-10",
            "bytes=0-10,20-30",
            "bytes",
            "bytes=",
            "bytes=--5",
        ] {
            assert_eq!(parse_range(Some(header), 1000), RangeRequest::Full, "{header}");
        }
    }
}
