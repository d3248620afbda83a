//! Lightweight similarity ranking for recall.
//!
//! Texts are embedded as sparse term-frequency vectors: lowercase
//! alphanumeric words plus overlapping bigrams of ideographic runs, so both
//! English and CJK content match. Ranking is cosine similarity.

use kestrel_core::memory::MemoryEntry;
use std::collections::HashMap;

pub type TermVector = HashMap<String, f32>;

fn is_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

fn flush_ideographs(run: &mut Vec<char>, vector: &mut TermVector) {
    match run.len() {
        0 => {}
        1 => *vector.entry(run[0].to_string()).or_insert(0.0) += 1.0,
        _ => {
            for pair in run.windows(2) {
                *vector.entry(pair.iter().collect()).or_insert(0.0) += 1.0;
            }
        }
    }
    run.clear();
}

/// Sparse term-frequency vector for `text`.
pub fn term_vector(text: &str) -> TermVector {
    let mut vector = TermVector::new();
    let mut word = String::new();
    let mut ideographs: Vec<char> = Vec::new();

    for c in text.chars() {
        if is_ideograph(c) {
            if !word.is_empty() {
                *vector.entry(std::mem::take(&mut word)).or_insert(0.0) += 1.0;
            }
            ideographs.push(c);
        } else if c.is_alphanumeric() {
            flush_ideographs(&mut ideographs, &mut vector);
            word.extend(c.to_lowercase());
        } else {
            flush_ideographs(&mut ideographs, &mut vector);
            if !word.is_empty() {
                *vector.entry(std::mem::take(&mut word)).or_insert(0.0) += 1.0;
            }
        }
    }
    flush_ideographs(&mut ideographs, &mut vector);
    if !word.is_empty() {
        *vector.entry(word).or_insert(0.0) += 1.0;
    }
    vector
}

/// Cosine similarity between two sparse vectors. Empty vectors score 0.
pub fn cosine_similarity(a: &TermVector, b: &TermVector) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(k, x)| large.get(k).map(|y| (*x as f64) * (*y as f64)))
        .sum();
    let norm = |v: &TermVector| v.values().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom) as f32
    }
}

/// Score `entries` against `query`, keep those above `min_score`, best first.
pub fn rank(entries: &[MemoryEntry], query: &str, limit: usize, min_score: f32) -> Vec<MemoryEntry> {
    let q = term_vector(query);
    let mut scored: Vec<MemoryEntry> = entries
        .iter()
        .filter_map(|entry| {
            let score = cosine_similarity(&q, &term_vector(&entry.content));
            (score > 0.0 && score >= min_score).then(|| {
                let mut e = entry.clone();
                e.score = score;
                e
            })
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_one() {
        let v = term_vector("graph neural networks");
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_texts_score_zero() {
        let a = term_vector("rust borrow checker");
        let b = term_vector("python decorators");
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn ideographs_become_bigrams() {
        let v = term_vector("知识图谱 and Rust");
        assert!(v.contains_key("知识"));
        assert!(v.contains_key("图谱"));
        assert!(v.contains_key("rust"));
    }

    #[test]
    fn rank_orders_and_truncates() {
        let entries = vec![
            MemoryEntry::new("Q: what is tokio | A: an async runtime for Rust"),
            MemoryEntry::new("Q: best pasta | A: carbonara"),
            MemoryEntry::new("Q: tokio vs async-std | A: tokio has the bigger ecosystem; tokio wins"),
        ];
        let ranked = rank(&entries, "tokio runtime", 2, 0.0);
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|e| e.content.contains("tokio")));
        assert!(ranked[0].score >= ranked[1].score);
    }
}
