//! Material name normalization and similarity
//!
//! Stock clerks type the same consumable many ways ("Luva de Látex",
//! "luva de latex ", "LUVA-DE-LATEX"). Names are folded to a canonical form
//! before comparing, and near matches are scored with the Ratcliff/Obershelp
//! ratio so duplicates can be spotted before a new material is registered.

use serde::{Deserialize, Serialize};

use crate::models::Material;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarMaterial {
    #[serde(flatten)]
    pub material: Material,
    pub similarity: f64,
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Lowercases, strips accents, drops anything but `[a-z0-9]` and single spaces
pub fn normalize_name(name: &str) -> String {
    let folded: String = name
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity in `[0, 1]` between two material names
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a: Vec<char> = normalize_name(a).chars().collect();
    let b: Vec<char> = normalize_name(b).chars().collect();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let matched = matching_chars(&a, &b);
    2.0 * matched as f64 / (a.len() + b.len()) as f64
}

/// Materials whose name scores at least `threshold`, best match first
pub fn find_similar<'a>(
    name: &str,
    materials: impl IntoIterator<Item = &'a Material>,
    threshold: f64,
) -> Vec<SimilarMaterial> {
    if name.trim().is_empty() {
        return Vec::new();
    }

    let mut similar: Vec<SimilarMaterial> = materials
        .into_iter()
        .filter_map(|material| {
            let score = similarity(name, &material.name);
            (score >= threshold).then(|| SimilarMaterial {
                material: material.clone(),
                similarity: score,
            })
        })
        .collect();

    similar.sort_by(|x, y| y.similarity.total_cmp(&x.similarity));
    similar
}

// Total length of the recursively matched blocks
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (start_a, start_b, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }

    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];

    for i in 0..a.len() {
        let mut row = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                row[j + 1] = prev[j] + 1;
                if row[j + 1] > best.2 {
                    best = (i + 1 - row[j + 1], j + 1 - row[j + 1], row[j + 1]);
                }
            }
        }
        prev = row;
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::material;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Luva  de Látex!! "), "luva de latex");
        assert_eq!(normalize_name("ALGODÃO 500g"), "algodao 500g");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn test_similarity_scores() {
        assert_eq!(similarity("Gaze", "gaze "), 1.0);
        assert_eq!(similarity("abcd", "abce"), 0.75);
        assert_eq!(similarity("", "gaze"), 0.0);
        assert_eq!(similarity("xyz", "abc"), 0.0);
    }

    #[test]
    fn test_find_similar_orders_by_score() {
        let mut luva = material(1, 0.5);
        luva.name = "Luva de latex".to_string();
        let mut luvas = material(2, 0.5);
        luvas.name = "Luvas de látex".to_string();
        let mut gaze = material(3, 0.2);
        gaze.name = "Gaze".to_string();

        let found = find_similar("luva de látex", [&luvas, &gaze, &luva], 0.8);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].material.id, 1);
        assert_eq!(found[0].similarity, 1.0);
        assert_eq!(found[1].material.id, 2);

        assert!(find_similar("   ", [&luva], 0.0).is_empty());
    }
}
