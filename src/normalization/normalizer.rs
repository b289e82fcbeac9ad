// src/normalization/normalizer.rs
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

use crate::errors::DedupError;
use crate::models::{NormalizedFeatures, RawProductRecord, UnitClass};
use crate::normalization::dictionaries::{CategoryKeywords, UNKNOWN_CATEGORY};
use crate::utils::config::DedupConfig;

/// Result of normalizing one record. Skips are values, not errors to unwind.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizationOutcome {
    Normalized(NormalizedFeatures),
    Skipped(DedupError),
}

/// Lowercases, strips diacritics and collapses whitespace.
pub fn fold_text(text: &str) -> String {
    let stripped: String = text
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok().filter(|q| q.is_finite())
}

/// Turns raw descriptions into `NormalizedFeatures`. Built once per run from the
/// configured dictionaries; holds no mutable state.
#[derive(Debug)]
pub struct ProductNormalizer {
    unit_table: HashMap<String, String>,
    unit_classes: BTreeMap<String, UnitClass>,
    brands: Vec<String>,
    categories: Vec<CategoryKeywords>,
    stopwords: HashSet<String>,
    abbreviations: HashMap<String, String>,
    multipack_re: Regex,
    quantity_re: Regex,
    bare_count_re: Regex,
}

impl ProductNormalizer {
    pub fn new(config: &DedupConfig) -> Result<Self> {
        let unit_table: HashMap<String, String> = config
            .unit_standardization_table
            .iter()
            .map(|(abbrev, canonical)| (fold_text(abbrev), canonical.trim().to_uppercase()))
            .filter(|(abbrev, _)| !abbrev.is_empty())
            .collect();
        if unit_table.is_empty() {
            return Err(DedupError::InvalidConfig(
                "unit standardization table is empty".to_string(),
            )
            .into());
        }

        // Longest abbreviations first so "kgs" wins over "kg" and "g".
        let mut abbrevs: Vec<&String> = unit_table.keys().collect();
        abbrevs.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = abbrevs
            .iter()
            .map(|a| regex::escape(a))
            .collect::<Vec<_>>()
            .join("|");

        let multipack_re = Regex::new(&format!(
            r"\b(\d+)\s*x\s*(\d+(?:[.,]\d+)?)\s*({})\b",
            alternation
        ))
        .context("Failed to compile multipack pattern")?;
        let quantity_re = Regex::new(&format!(r"\b(\d+(?:[.,]\d+)?)\s*({})\b", alternation))
            .context("Failed to compile quantity pattern")?;
        let bare_count_re =
            Regex::new(r"\b(\d+)\s*x\b").context("Failed to compile bare count pattern")?;

        let brands = config
            .brands
            .iter()
            .map(|b| fold_text(b))
            .filter(|b| !b.is_empty())
            .collect();
        let categories = config
            .categories
            .iter()
            .map(|c| CategoryKeywords {
                name: c.name.clone(),
                keywords: c.keywords.iter().map(|k| fold_text(k)).collect(),
            })
            .collect();
        let stopwords = config.stopwords.iter().map(|s| fold_text(s)).collect();
        let abbreviations = config
            .abbreviations
            .iter()
            .map(|(short, full)| (fold_text(short), fold_text(full)))
            .filter(|(short, full)| !short.is_empty() && !full.is_empty())
            .collect();

        Ok(Self {
            unit_table,
            unit_classes: config.unit_classes.clone(),
            brands,
            categories,
            stopwords,
            abbreviations,
            multipack_re,
            quantity_re,
            bare_count_re,
        })
    }

    /// Maps a unit abbreviation ("Kg", "quilo", "LT") to its canonical form.
    pub fn canonical_unit(&self, raw_unit: &str) -> Option<String> {
        self.unit_table.get(&fold_text(raw_unit)).cloned()
    }

    pub fn unit_class(&self, canonical_unit: &str) -> Option<UnitClass> {
        self.unit_classes.get(canonical_unit).copied()
    }

    /// Record-level checks that do not depend on the description's content.
    pub fn check_record(record: &RawProductRecord) -> Result<(), DedupError> {
        if record.occurrence_count == 0 {
            return Err(DedupError::MalformedRecord {
                record_id: record.id.clone(),
                reason: "occurrence_count must be at least 1".to_string(),
            });
        }
        if record.local_description.trim().is_empty() {
            return Err(DedupError::MalformedRecord {
                record_id: record.id.clone(),
                reason: "empty description".to_string(),
            });
        }
        Ok(())
    }

    pub fn normalize(&self, record: &RawProductRecord) -> NormalizationOutcome {
        if let Err(e) = Self::check_record(record) {
            return NormalizationOutcome::Skipped(e);
        }
        match self.extract(&record.local_description, record.local_unit.as_deref()) {
            Some(features) => NormalizationOutcome::Normalized(features),
            None => NormalizationOutcome::Skipped(DedupError::MalformedRecord {
                record_id: record.id.clone(),
                reason: format!(
                    "no tokens left after normalizing '{}'",
                    record.local_description
                ),
            }),
        }
    }

    /// Rewrites whole words found in the abbreviation table. A trailing "." is
    /// ignored, and slash keys such as "c/" also expand when glued to the next word.
    pub fn expand_abbreviations(&self, folded: &str) -> String {
        if self.abbreviations.is_empty() {
            return folded.to_string();
        }
        let mut out: Vec<String> = Vec::new();
        for word in folded.split_whitespace() {
            let bare = word.trim_end_matches('.');
            if let Some(full) = self.abbreviations.get(bare) {
                out.push(full.clone());
                continue;
            }
            if let Some(slash) = word.find('/') {
                let (head, tail) = word.split_at(slash + 1);
                if let Some(full) = self.abbreviations.get(head) {
                    out.push(full.clone());
                    if !tail.is_empty() {
                        out.push(self.expand_abbreviations(tail));
                    }
                    continue;
                }
            }
            out.push(word.to_string());
        }
        out.join(" ")
    }

    /// Feature extraction proper. None when nothing but stopwords and measures remain.
    pub fn extract(&self, description: &str, local_unit: Option<&str>) -> Option<NormalizedFeatures> {
        let folded = self.expand_abbreviations(&fold_text(description));
        if folded.is_empty() {
            return None;
        }

        let (rest, quantity, mut unit_canonical, pack_count) = self.extract_measure(&folded);
        if unit_canonical.is_none() {
            unit_canonical = local_unit.and_then(|u| self.canonical_unit(u));
        }

        let words: Vec<&str> = rest
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let padded = format!(" {} ", words.join(" "));

        let mut seen = HashSet::new();
        let tokens: Vec<String> = words
            .iter()
            .filter(|w| !self.stopwords.contains(**w))
            .filter(|w| seen.insert(**w))
            .map(|w| w.to_string())
            .collect();
        if tokens.is_empty() {
            return None;
        }

        let brand_guess = self.guess_brand(&padded);
        let category_guess = self.guess_category(&padded);

        Some(NormalizedFeatures {
            normalized_text: tokens.join(" "),
            tokens,
            quantity,
            unit_canonical,
            pack_count,
            brand_guess,
            category_guess,
        })
    }

    /// Pulls the first measure out of the folded text, returning the text with
    /// the matched span blanked.
    fn extract_measure(&self, folded: &str) -> (String, Option<f64>, Option<String>, Option<u32>) {
        if let Some(caps) = self.multipack_re.captures(folded) {
            let pack = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
            let quantity = caps.get(2).and_then(|m| parse_decimal(m.as_str()));
            let unit = caps.get(3).and_then(|m| self.unit_table.get(m.as_str()).cloned());
            if let Some(whole) = caps.get(0) {
                let rest = format!("{} {}", &folded[..whole.start()], &folded[whole.end()..]);
                return (rest, quantity, unit, pack);
            }
        }
        if let Some(caps) = self.quantity_re.captures(folded) {
            let quantity = caps.get(1).and_then(|m| parse_decimal(m.as_str()));
            let unit = caps.get(2).and_then(|m| self.unit_table.get(m.as_str()).cloned());
            if let Some(whole) = caps.get(0) {
                let rest = format!("{} {}", &folded[..whole.start()], &folded[whole.end()..]);
                return (rest, quantity, unit, None);
            }
        }
        if let Some(caps) = self.bare_count_re.captures(folded) {
            // "12x" counts items
            let quantity = caps.get(1).and_then(|m| parse_decimal(m.as_str()));
            if let Some(whole) = caps.get(0) {
                let rest = format!("{} {}", &folded[..whole.start()], &folded[whole.end()..]);
                return (rest, quantity, Some("UN".to_string()), None);
            }
        }
        (folded.to_string(), None, None, None)
    }

    fn guess_brand(&self, padded: &str) -> Option<String> {
        let mut best: Option<&String> = None;
        for brand in &self.brands {
            if padded.contains(&format!(" {} ", brand))
                && best.map_or(true, |b| brand.chars().count() > b.chars().count())
            {
                best = Some(brand);
            }
        }
        best.cloned()
    }

    fn guess_category(&self, padded: &str) -> String {
        self.categories
            .iter()
            .find(|c| {
                c.keywords
                    .iter()
                    .any(|k| !k.is_empty() && padded.contains(&format!(" {} ", k)))
            })
            .map(|c| c.name.clone())
            .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> ProductNormalizer {
        ProductNormalizer::new(&DedupConfig::default()).unwrap()
    }

    fn features(description: &str) -> NormalizedFeatures {
        normalizer().extract(description, None).unwrap()
    }

    #[test]
    fn test_fold_text_strips_accents_and_case() {
        assert_eq!(fold_text("  Feijão   CARIOCA  "), "feijao carioca");
        assert_eq!(fold_text("AÇÚCAR União"), "acucar uniao");
    }

    #[test]
    fn test_unit_abbreviations_share_canonical_form() {
        let n = normalizer();
        for raw in ["Kg", "KG", "kg", "quilo"] {
            assert_eq!(n.canonical_unit(raw).as_deref(), Some("KG"), "unit {}", raw);
        }
        assert_eq!(n.canonical_unit("parsec"), None);
    }

    #[test]
    fn test_quantity_extraction_forms() {
        let f = features("ARROZ TIO JOAO 5KG");
        assert_eq!(f.quantity, Some(5.0));
        assert_eq!(f.unit_canonical.as_deref(), Some("KG"));
        assert_eq!(f.tokens, vec!["arroz", "tio", "joao"]);

        let f = features("Arroz Tio Joao 5 Kg");
        assert_eq!(f.normalized_text, "arroz tio joao");
        assert_eq!(f.unit_canonical.as_deref(), Some("KG"));

        let f = features("Oleo de Soja 900ml");
        assert_eq!(f.quantity, Some(900.0));
        assert_eq!(f.unit_canonical.as_deref(), Some("ML"));
        assert_eq!(f.tokens, vec!["oleo", "soja"]);

        let f = features("Refrigerante Guarana 12 x 350ml");
        assert_eq!(f.pack_count, Some(12));
        assert_eq!(f.quantity, Some(350.0));
        assert_eq!(f.unit_canonical.as_deref(), Some("ML"));

        let f = features("Queijo Mussarela 1,5kg");
        assert_eq!(f.quantity, Some(1.5));

        let f = features("Ovos Brancos 12x");
        assert_eq!(f.quantity, Some(12.0));
        assert_eq!(f.unit_canonical.as_deref(), Some("UN"));
    }

    #[test]
    fn test_missing_unit_is_none_unless_local_unit_given() {
        let n = normalizer();
        let f = n.extract("Banana Prata", None).unwrap();
        assert_eq!(f.unit_canonical, None);
        assert_eq!(f.quantity, None);

        let f = n.extract("Banana Prata", Some("KG")).unwrap();
        assert_eq!(f.unit_canonical.as_deref(), Some("KG"));
        assert_eq!(f.quantity, None);

        let f = n.extract("Banana Prata", Some("caixote")).unwrap();
        assert_eq!(f.unit_canonical, None);
    }

    #[test]
    fn test_brand_longest_match_wins() {
        let f = features("Refrigerante Guarana Antarctica 2L");
        assert_eq!(f.brand_guess.as_deref(), Some("guarana antarctica"));

        let f = features("Arroz Tio João Tipo 1 5kg");
        assert_eq!(f.brand_guess.as_deref(), Some("tio joao"));

        // whole words only
        let f = features("Acerola Polpa");
        assert_eq!(f.brand_guess, None);
    }

    #[test]
    fn test_category_lookup_order_and_default() {
        assert_eq!(features("Leite Integral 1L").category_guess, "dairy");
        assert_eq!(features("Suco de Laranja 1L").category_guess, "beverages");
        assert_eq!(features("Peito de Frango").category_guess, "meat");
        assert_eq!(features("Detergente Ype 500ml").category_guess, "cleaning");
        assert_eq!(features("Arroz Camil 1kg").category_guess, "other");
        assert_eq!(features("Pilha Alcalina AA").category_guess, "unknown");
    }

    #[test]
    fn test_abbreviations_expand_on_whole_words() {
        let n = normalizer();
        assert_eq!(
            n.expand_abbreviations("cafe pilao trad 500g"),
            "cafe pilao tradicional 500g"
        );
        assert_eq!(n.expand_abbreviations("leite int. 1l"), "leite integral 1l");
        assert_eq!(n.expand_abbreviations("refrig s/acucar 2l"), "refrigerante sem acucar 2l");
        assert_eq!(n.expand_abbreviations("iogurte c/ morango"), "iogurte com morango");
        // "intenso" and "tradicao" are words of their own
        assert_eq!(n.expand_abbreviations("cafe intenso tradicao"), "cafe intenso tradicao");

        let short = features("CAFE PILAO TRAD 500G");
        let long = features("Cafe Pilao Tradicional 500g");
        assert_eq!(short.tokens, long.tokens);
        assert_eq!(short.quantity, Some(500.0));
    }

    #[test]
    fn test_abbreviation_table_is_configurable() {
        let mut config = DedupConfig::default();
        config.abbreviations.clear();
        let plain = ProductNormalizer::new(&config).unwrap();
        assert_eq!(
            plain.extract("Cafe Pilao Trad", None).unwrap().tokens,
            vec!["cafe", "pilao", "trad"]
        );

        config
            .abbreviations
            .insert("Extr".to_string(), "Extra Forte".to_string());
        let custom = ProductNormalizer::new(&config).unwrap();
        assert_eq!(
            custom.extract("Cafe Pilao EXTR", None).unwrap().tokens,
            vec!["cafe", "pilao", "extra", "forte"]
        );
    }

    #[test]
    fn test_tokens_drop_stopwords_and_repeats() {
        let f = features("Feijao do Feijao de Corda");
        assert_eq!(f.tokens, vec!["feijao", "corda"]);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let n = normalizer();
        let empty = RawProductRecord::new("r1", "e1", "   ");
        match n.normalize(&empty) {
            NormalizationOutcome::Skipped(DedupError::MalformedRecord { record_id, .. }) => {
                assert_eq!(record_id, "r1")
            }
            other => panic!("expected skip, got {:?}", other),
        }

        let only_measure = RawProductRecord::new("r2", "e1", "500 ml");
        assert!(matches!(n.normalize(&only_measure), NormalizationOutcome::Skipped(_)));

        let mut zero = RawProductRecord::new("r3", "e1", "Arroz 5kg");
        zero.occurrence_count = 0;
        assert!(matches!(n.normalize(&zero), NormalizationOutcome::Skipped(_)));
    }
}
