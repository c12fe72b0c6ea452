//! Domain classification stage.
//!
//! Keyword-table classifier over the extracted full text. A domain is
//! reported when enough of its keywords appear; results are ordered by
//! hit count with `general` as the fallback. Also pulls out likely
//! technical terms and maps domains to CPC class hints for downstream
//! query expansion.

use async_trait::async_trait;
use tracing::debug;

use crate::error::StageError;
use crate::pipeline::{Classification, PipelineStage, RunArtifact, Stage};

/// Minimum keyword hits for a domain to count
const MIN_KEYWORD_HITS: usize = 2;

/// Cap on extracted technical terms
const MAX_TECHNICAL_TERMS: usize = 20;

const DOMAIN_KEYWORDS: [(&str, &[&str]); 8] = [
    (
        "software",
        &[
            "algorithm",
            "software",
            "computer",
            "processor",
            "application",
            "program",
            "code",
            "data",
            "server",
            "database",
            "interface",
            "api",
            "network",
            "cloud",
            "machine learning",
            "artificial intelligence",
        ],
    ),
    (
        "mechanical",
        &[
            "mechanism",
            "device",
            "apparatus",
            "structure",
            "assembly",
            "component",
            "gear",
            "motor",
            "bearing",
            "valve",
            "actuator",
            "mechanical",
            "engine",
            "machine",
            "tool",
        ],
    ),
    (
        "electrical",
        &[
            "circuit",
            "electrical",
            "electronic",
            "signal",
            "voltage",
            "current",
            "power",
            "transistor",
            "semiconductor",
            "microprocessor",
            "integrated circuit",
            "pcb",
            "conductor",
            "capacitor",
            "resistor",
        ],
    ),
    (
        "chemical",
        &[
            "compound",
            "composition",
            "reaction",
            "molecule",
            "chemical",
            "synthesis",
            "catalyst",
            "polymer",
            "solvent",
            "reagent",
            "formulation",
            "mixture",
            "solution",
            "substance",
        ],
    ),
    (
        "biotechnology",
        &[
            "protein",
            "gene",
            "cell",
            "biological",
            "organism",
            "dna",
            "rna",
            "enzyme",
            "antibody",
            "bacteria",
            "virus",
            "genetic",
            "biotechnology",
            "genome",
            "peptide",
        ],
    ),
    (
        "medical",
        &[
            "treatment",
            "diagnosis",
            "therapeutic",
            "patient",
            "medical",
            "clinical",
            "disease",
            "therapy",
            "pharmaceutical",
            "drug",
            "medicine",
            "surgical",
            "healthcare",
            "diagnostic",
        ],
    ),
    (
        "telecommunications",
        &[
            "wireless",
            "communication",
            "antenna",
            "frequency",
            "transmission",
            "receiver",
            "transmitter",
            "signal processing",
            "modulation",
            "bandwidth",
            "cellular",
            "5g",
            "radio",
        ],
    ),
    (
        "optics",
        &[
            "optical",
            "laser",
            "light",
            "lens",
            "photon",
            "beam",
            "wavelength",
            "spectrum",
            "imaging",
            "camera",
            "display",
        ],
    ),
];

/// CPC class prefixes suggested per domain
const CPC_HINTS: [(&str, &[&str]); 8] = [
    ("software", &["G06F"]),
    ("mechanical", &["F16"]),
    ("electrical", &["H01", "H02"]),
    ("chemical", &["C07", "C08"]),
    ("biotechnology", &["C12"]),
    ("medical", &["A61"]),
    ("telecommunications", &["H04"]),
    ("optics", &["G02"]),
];

pub struct ClassifyStage;

#[async_trait]
impl Stage for ClassifyStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Classifying
    }

    async fn execute(&self, mut artifact: RunArtifact) -> Result<RunArtifact, StageError> {
        let full_text = artifact
            .extracted
            .as_ref()
            .map(|e| e.full_text.as_str())
            .unwrap_or_default();

        let domains = classify_domains(full_text);
        let technical_terms = extract_technical_terms(full_text);
        let cpc_hints = cpc_hints_for(&domains);

        debug!(
            doc_id = %artifact.document.id,
            domains = ?domains,
            terms = technical_terms.len(),
            "Document classified"
        );

        artifact.classification = Some(Classification {
            domains,
            technical_terms,
            cpc_hints,
        });
        Ok(artifact)
    }
}

/// Score each domain by keyword hits and return qualifying domains
/// ordered by score. Ties keep table order (stable sort).
fn classify_domains(text: &str) -> Vec<String> {
    let text_lower = text.to_lowercase();

    let mut scored: Vec<(&str, usize)> = DOMAIN_KEYWORDS
        .iter()
        .filter_map(|(domain, keywords)| {
            let matches = keywords.iter().filter(|k| text_lower.contains(**k)).count();
            (matches >= MIN_KEYWORD_HITS).then_some((*domain, matches))
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    if scored.is_empty() {
        vec!["general".to_string()]
    } else {
        scored.into_iter().map(|(d, _)| d.to_string()).collect()
    }
}

/// Heuristic term extraction: capitalized words that do not open a
/// sentence, deduplicated in order of first appearance.
fn extract_technical_terms(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut terms: Vec<String> = Vec::new();

    for (i, word) in words.iter().enumerate() {
        let clean = word.trim_matches(|c: char| ".,;:!?()".contains(c));
        if clean.chars().count() <= 2 || i == 0 {
            continue;
        }
        if !clean.chars().next().is_some_and(char::is_uppercase) {
            continue;
        }
        // The previous word ending a sentence makes this a likely
        // sentence start, not a term.
        if words[i - 1].ends_with('.') {
            continue;
        }
        if !terms.iter().any(|t| t == clean) {
            terms.push(clean.to_string());
        }
        if terms.len() == MAX_TECHNICAL_TERMS {
            break;
        }
    }

    terms
}

/// Map detected domains to CPC class prefixes, first-seen order
fn cpc_hints_for(domains: &[String]) -> Vec<String> {
    let mut hints: Vec<String> = Vec::new();
    for domain in domains {
        if let Some((_, classes)) = CPC_HINTS.iter().find(|(d, _)| d == domain) {
            for class in *classes {
                if !hints.iter().any(|h| h == class) {
                    hints.push((*class).to_string());
                }
            }
        }
    }
    hints
}
