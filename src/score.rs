//! Relevance ranking for keyword movie searches.

use crate::release::ReleaseRecord;

/// Added once per query token that the title does not contain.
pub const SENTINEL: u32 = 100_000;

const SEPARATORS: &[char] = &[' ', '.', ',', ';', '(', ')', '[', ']', '-', '_'];

/// Lower-cases and splits on the catalog's word separators.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(SEPARATORS)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Sum of each query token's position in the title. A title token counts for
/// one query token only; claimed slots stay in place so later positions do
/// not shift. Lower is better.
pub fn score(query: &str, title: &str) -> u32 {
    let mut slots: Vec<Option<String>> = tokenize(title).into_iter().map(Some).collect();

    tokenize(query)
        .iter()
        .map(|word| {
            let found = slots
                .iter()
                .position(|slot| slot.as_deref() == Some(word.as_str()));
            match found {
                Some(index) => {
                    slots[index] = None;
                    index as u32
                }
                None => SENTINEL,
            }
        })
        .fold(0u32, u32::saturating_add)
}

/// Scores every record against `query`, optionally drops records missing a
/// query word, and orders the rest best first. Ties keep their input order.
pub fn rank_and_filter(records: &mut Vec<ReleaseRecord>, query: &str, strict: bool) {
    for record in records.iter_mut() {
        record.score = score(query, &record.title);
    }

    if strict {
        records.retain(|record| record.score < SENTINEL);
    }

    records.sort_by_key(|record| record.score);
}

/// Folds accented Latin letters to their base letter (`á` → `a`, `ñ` → `n`).
pub fn strip_diacritics(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ç' => 'c',
        'Ç' => 'C',
        'ý' | 'ÿ' => 'y',
        'Ý' => 'Y',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use url::Url;

    use super::*;
    use crate::release::{RawItem, ReleaseType, assemble};

    fn movie(title: &str) -> ReleaseRecord {
        let mut record = assemble(RawItem {
            release_type: ReleaseType::Movie,
            title: title.to_string(),
            details_uri: Url::parse("https://descargas2020.org/pelicula/x/").unwrap(),
            quality: None,
            language: None,
            size_bytes: 0,
            publish_date: OffsetDateTime::UNIX_EPOCH,
        });
        record.title = title.to_string();
        record
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Blade.Runner (2049) [BluRay_1080p]"),
            vec!["blade", "runner", "2049", "bluray", "1080p"]
        );
    }

    #[test]
    fn test_leading_query_scores_by_position() {
        assert_eq!(score("blade runner", "Blade Runner 2049 [BluRay]"), 1);
        assert_eq!(score("Matrix", "Matrix.BluRay.1080p"), 0);
    }

    #[test]
    fn test_claimed_slots_do_not_shift_positions() {
        assert_eq!(score("runner blade", "El Blade Runner"), 3);
        assert_eq!(score("a b", "x a b"), 3);
        assert_eq!(score("a b", "b x a"), 2);
        assert_eq!(score("dos dos", "dos x dos"), 2);
    }

    #[test]
    fn test_missing_word_hits_sentinel() {
        assert!(score("blade runner", "Blade 2") >= SENTINEL);
        assert!(score("blade runner", "Blade Runner") < SENTINEL);
        // Repeated query words need repeated title words.
        assert!(score("dos dos", "Dos hermanos") >= SENTINEL);
    }

    #[test]
    fn test_strict_filter_drops_partial_matches() {
        let mut records = vec![movie("Blade 2"), movie("Blade Runner 2049")];

        rank_and_filter(&mut records, "blade runner", true);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Blade Runner 2049");
    }

    #[test]
    fn test_lenient_ranking_puts_partial_matches_last() {
        let mut records = vec![
            movie("Blade 2"),
            movie("The Blade Runner"),
            movie("Blade Runner 2049"),
        ];

        rank_and_filter(&mut records, "blade runner", false);

        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Blade Runner 2049", "The Blade Runner", "Blade 2"]);
        assert!(records[2].score >= SENTINEL);
    }

    #[test]
    fn test_strip_diacritics() {
        assert_eq!(strip_diacritics("El niño y la garça"), "El nino y la garca");
        assert_eq!(strip_diacritics("ÁRBOL Él"), "ARBOL El");
    }
}
