//! Title normalization and TF-IDF term vectors.
//!
//! Pure functions shared by the clusterer (signal titles) and the flow
//! detector (topic labels). Vocabulary indices are assigned in sorted term
//! order so vectors are identical across runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

/// Two or more word characters, the usual bag-of-words token pattern.
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w\w+\b").unwrap());

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static PUNCTUATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any", "are",
    "as", "at", "be", "been", "before", "being", "below", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how",
    "if", "in", "into", "is", "it", "its", "itself", "just", "me", "more", "most", "my", "no",
    "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "out",
    "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
];

/// Sparse term vector: `(term index, weight)` sorted by index.
pub type SparseVector = Vec<(usize, f64)>;

/// Collapse whitespace, trim, and cap the title at `max_chars` characters.
pub fn clean_title(title: &str, max_chars: usize) -> String {
    let collapsed = WHITESPACE_RE.replace_all(title.trim(), " ");
    collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Dedup key: lowercase, punctuation stripped, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let stripped = PUNCTUATION_RE.replace_all(&lower, " ");
    WHITESPACE_RE.replace_all(stripped.trim(), " ").into_owned()
}

/// Lowercased word tokens with stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// All 1..=`max_n` grams of the token sequence, space-joined.
pub fn ngrams(tokens: &[String], max_n: usize) -> Vec<String> {
    let mut grams = Vec::new();
    for n in 1..=max_n.min(tokens.len()) {
        for window in tokens.windows(n) {
            grams.push(window.join(" "));
        }
    }
    grams
}

/// Fitted TF-IDF vocabulary with smoothed inverse document frequency.
#[derive(Debug, Clone)]
pub struct TfIdf {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
    max_n: usize,
}

impl TfIdf {
    /// Fit on `docs` and return the L2-normalized vector of each doc.
    /// Docs with no usable terms get an empty vector.
    pub fn fit_transform(docs: &[&str], max_n: usize) -> (Self, Vec<SparseVector>) {
        let doc_terms: Vec<Vec<String>> = docs
            .iter()
            .map(|d| ngrams(&tokenize(d), max_n))
            .collect();

        let vocabulary: BTreeMap<String, usize> = doc_terms
            .iter()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .enumerate()
            .map(|(i, term)| (term, i))
            .collect();

        let mut df = vec![0usize; vocabulary.len()];
        for terms in &doc_terms {
            let unique: BTreeSet<usize> = terms.iter().filter_map(|t| vocabulary.get(t).copied()).collect();
            for idx in unique {
                df[idx] += 1;
            }
        }

        let n = docs.len() as f64;
        let idf = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let model = Self {
            vocabulary,
            idf,
            max_n,
        };
        let vectors = doc_terms.iter().map(|terms| model.weigh(terms)).collect();
        (model, vectors)
    }

    /// Vectorize a new document against the fitted vocabulary. Unknown terms are ignored.
    pub fn transform(&self, doc: &str) -> SparseVector {
        self.weigh(&ngrams(&tokenize(doc), self.max_n))
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    fn weigh(&self, terms: &[String]) -> SparseVector {
        let mut tf: BTreeMap<usize, f64> = BTreeMap::new();
        for term in terms {
            if let Some(&idx) = self.vocabulary.get(term) {
                *tf.entry(idx).or_default() += 1.0;
            }
        }
        let mut vector: SparseVector = tf
            .into_iter()
            .map(|(idx, count)| (idx, count * self.idf[idx]))
            .collect();
        let n = norm(&vector);
        if n > 0.0 {
            for (_, w) in &mut vector {
                *w /= n;
            }
        }
        vector
    }
}

pub fn dot(a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
    let (mut i, mut j, mut sum) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

pub fn norm(v: &[(usize, f64)]) -> f64 {
    v.iter().map(|(_, w)| w * w).sum::<f64>().sqrt()
}

/// Cosine similarity clamped to [0, 1]; zero when either vector is empty.
pub fn cosine(a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (na * nb)).clamp(0.0, 1.0)
}

/// Component-wise mean of the given vectors.
pub fn centroid<'a>(vectors: impl IntoIterator<Item = &'a SparseVector>) -> SparseVector {
    let mut sum: BTreeMap<usize, f64> = BTreeMap::new();
    let mut n = 0usize;
    for v in vectors {
        n += 1;
        for &(idx, w) in v {
            *sum.entry(idx).or_default() += w;
        }
    }
    if n == 0 {
        return Vec::new();
    }
    sum.into_iter().map(|(idx, w)| (idx, w / n as f64)).collect()
}
