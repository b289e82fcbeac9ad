// src/normalization/dictionaries.rs
//! Default lookup tables for Brazilian retail descriptions. All of them are
//! configuration: `DedupConfig` carries a copy that a JSON file may replace.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::UnitClass;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryKeywords {
    pub name: String,
    pub keywords: Vec<String>,
}

pub const UNKNOWN_CATEGORY: &str = "unknown";

pub fn default_unit_table() -> BTreeMap<String, String> {
    let entries: &[(&str, &str)] = &[
        ("un", "UN"),
        ("und", "UN"),
        ("unid", "UN"),
        ("unidade", "UN"),
        ("unidades", "UN"),
        ("kg", "KG"),
        ("kgs", "KG"),
        ("kilo", "KG"),
        ("quilo", "KG"),
        ("quilos", "KG"),
        ("g", "G"),
        ("gr", "G"),
        ("grs", "G"),
        ("grama", "G"),
        ("gramas", "G"),
        ("mg", "MG"),
        ("ml", "ML"),
        ("mililitro", "ML"),
        ("mililitros", "ML"),
        ("l", "L"),
        ("lt", "L"),
        ("lts", "L"),
        ("litro", "L"),
        ("litros", "L"),
        ("pct", "PCT"),
        ("pacote", "PCT"),
        ("cx", "CX"),
        ("caixa", "CX"),
        ("dz", "DZ"),
        ("duzia", "DZ"),
    ];
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn default_unit_classes() -> BTreeMap<String, UnitClass> {
    let entries: &[(&str, UnitClass)] = &[
        ("KG", UnitClass::Weight),
        ("G", UnitClass::Weight),
        ("MG", UnitClass::Weight),
        ("L", UnitClass::Volume),
        ("ML", UnitClass::Volume),
        ("UN", UnitClass::Count),
        ("PCT", UnitClass::Count),
        ("CX", UnitClass::Count),
        ("DZ", UnitClass::Count),
    ];
    entries.iter().map(|(k, c)| (k.to_string(), *c)).collect()
}

/// Brand dictionary, in declaration order (ties on length go to the earlier entry).
pub fn default_brands() -> Vec<String> {
    [
        "tio joao", "camil", "kicaldo", "prato fino", "namorado", "nestle", "sadia", "perdigao",
        "seara", "aurora", "friboi", "qualy", "doriana", "liza", "soya", "uniao", "coca cola",
        "pepsi", "guarana antarctica", "antarctica", "brahma", "skol", "heineken", "kuat",
        "sprite", "fanta", "schweppes", "del valle", "maguary", "tang", "crystal", "bonafont",
        "lindoya", "danone", "vigor", "itambe", "parmalat", "piracanjuba", "betania", "elege",
        "tirolez", "polenghi", "catupiry", "omo", "surf", "ariel", "ace", "vanish", "comfort",
        "ype", "minuano", "veja", "cif", "ajax", "bombril", "assolan", "dove", "rexona", "nivea",
        "colgate", "pantene", "seda", "pilao", "melitta", "tres coracoes", "italac", "batavo",
    ]
    .iter()
    .map(|b| b.to_string())
    .collect()
}

/// Category keyword lists, in lookup order.
pub fn default_categories() -> Vec<CategoryKeywords> {
    let table: &[(&str, &[&str])] = &[
        (
            "beverages",
            &[
                "refrigerante", "refri", "suco", "agua", "cerveja", "vinho", "cafe", "cha",
                "guarana", "energetico", "isotonico", "achocolatado", "refresco", "nectar",
            ],
        ),
        (
            "dairy",
            &[
                "leite", "queijo", "iogurte", "manteiga", "nata", "requeijao", "ricota",
                "mussarela", "parmesao", "coalhada", "creme", "margarina",
            ],
        ),
        (
            "meat",
            &[
                "carne", "frango", "peixe", "porco", "suino", "bovino", "linguica", "salsicha",
                "hamburguer", "bacon", "presunto", "mortadela", "salame", "peito", "coxa",
                "file", "costela", "patinho", "alcatra", "picanha",
            ],
        ),
        (
            "produce",
            &[
                "banana", "maca", "laranja", "limao", "tomate", "batata", "cebola", "alho",
                "cenoura", "alface", "mamao", "abacaxi", "uva", "melancia", "couve", "ovos",
                "ovo",
            ],
        ),
        (
            "cleaning",
            &[
                "detergente", "sabao", "amaciante", "desinfetante", "limpa", "alvejante",
                "multiuso", "sanitaria", "esponja", "lustra", "lixo",
            ],
        ),
        (
            "other",
            &[
                "arroz", "feijao", "macarrao", "massa", "farinha", "acucar", "sal", "oleo",
                "vinagre", "molho", "tempero", "biscoito", "bolacha", "pao", "bolo", "shampoo",
                "sabonete", "desodorante", "papel",
            ],
        ),
    ];
    table
        .iter()
        .map(|(name, keywords)| CategoryKeywords {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        })
        .collect()
}

/// Shorthand seen on receipts, expanded before tokenizing. Keys ending in "/"
/// also match as a prefix ("c/acucar").
pub fn default_abbreviations() -> BTreeMap<String, String> {
    let entries: &[(&str, &str)] = &[
        ("trad", "tradicional"),
        ("tradic", "tradicional"),
        ("int", "integral"),
        ("integ", "integral"),
        ("desc", "descremado"),
        ("desn", "desnatado"),
        ("semidesn", "semidesnatado"),
        ("c/", "com"),
        ("s/", "sem"),
        ("refrig", "refrigerante"),
        ("refri", "refrigerante"),
        ("choc", "chocolate"),
        ("bisc", "biscoito"),
        ("parb", "parboilizado"),
        ("amac", "amaciante"),
        ("deterg", "detergente"),
        ("cong", "congelado"),
        ("acuc", "acucar"),
        ("mac", "macarrao"),
        ("moid", "moido"),
    ];
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn default_stopwords() -> Vec<String> {
    [
        "de", "da", "do", "dos", "das", "com", "para", "por", "em", "na", "no", "nas", "nos", "e",
        "ou", "a", "o", "as", "os", "tipo", "c", "p",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
