//! Integration tests for query classification and complexity scoring
//!
//! Runs the embedded rule sets through the public API.

use lexis_engine::classifier::{QueryClassifier, ResearchMode, RuleSet, SearchStrategy};
use lexis_engine::complexity::{ComplexityLevel, ComplexityScorer};

fn deep() -> QueryClassifier {
    QueryClassifier::for_mode(ResearchMode::Deep).unwrap()
}

fn lightweight() -> QueryClassifier {
    QueryClassifier::for_mode(ResearchMode::Lightweight).unwrap()
}

#[test]
fn test_greeting_needs_no_search() {
    let result = deep().classify("Hola, buenos días");
    assert!(!result.requires_search);
    assert!(result.confidence >= 0.85);
}

#[test]
fn test_article_reference_in_code() {
    let result = deep().classify("¿Qué dice el artículo 15 del Código Civil sobre contratos?");
    assert!(result.requires_search);
    assert_eq!(result.confidence, 0.95);
    assert_eq!(result.strategy, SearchStrategy::Code);
    assert_eq!(result.matched_entities, vec!["articulo 15".to_string()]);
}

#[test]
fn test_two_keywords_without_reference() {
    let query = "Mi arrendador quiere subir la renta a mitad de año y no sé si eso es legal o no.";
    assert_eq!(query.chars().count(), 80);

    let result = deep().classify(query);
    assert!(result.requires_search);
    assert_eq!(result.confidence, 0.7);
    assert_eq!(result.matched_keywords.len(), 2);
    assert!(result.matched_entities.is_empty());
    assert_eq!(result.strategy, SearchStrategy::General);
}

#[test]
fn test_greeting_wins_over_keywords_in_short_message() {
    let result = deep().classify("Hola, tengo una duda sobre mi contrato");
    assert!(!result.requires_search);
}

#[test]
fn test_long_message_starting_with_greeting_is_classified() {
    let result = deep().classify(
        "Hola, ¿qué dice el artículo 15 del Código Civil sobre los contratos de arrendamiento?",
    );
    assert!(result.requires_search);
    assert_eq!(result.matched_entities, vec!["articulo 15".to_string()]);
}

#[test]
fn test_off_topic_short_message() {
    let result = deep().classify("¿Qué clima hará mañana?");
    assert!(!result.requires_search);
    assert_eq!(result.confidence, 0.85);
}

#[test]
fn test_diacritics_do_not_matter() {
    let accented = deep().classify("¿Qué establece el artículo 123 de la Constitución Política?");
    let plain = deep().classify("que establece el articulo 123 de la constitucion politica");
    assert_eq!(accented, plain);
    assert_eq!(accented.strategy, SearchStrategy::Constitutional);
}

#[test]
fn test_court_reference() {
    let result = deep().classify("criterios de la Suprema Corte de Justicia sobre pensión alimenticia");
    assert!(result.requires_search);
    assert_eq!(result.confidence, 0.95);
    assert_eq!(
        result.matched_entities,
        vec!["suprema corte de justicia".to_string()]
    );
}

#[test]
fn test_lightweight_rule_set_is_smaller() {
    let light = lightweight();
    assert_eq!(light.rule_set().name, "lightweight");

    // A deep-only keyword
    assert!(deep().classify("quiero saber sobre la herencia de mi padre fallecido").requires_search);
    assert!(!light.classify("quiero saber sobre la herencia de mi padre fallecido").requires_search);

    assert!(light.classify("¿Qué dice el artículo 4?").requires_search);
}

#[test]
fn test_custom_rule_set_replaces_embedded() {
    let rules = RuleSet::from_toml_str(
        r#"
version = 7
name = "tax"

[[rules]]
pattern = '\b(iva|isr|sat)\b'
category = "domain_keyword"
weight = 2.0
"#,
    )
    .unwrap();
    let classifier = QueryClassifier::new(rules);
    assert_eq!(classifier.rule_set().version, 7);

    let result = classifier.classify("¿Cuándo vence la declaración del IVA este mes?");
    assert!(result.requires_search);
    assert_eq!(result.confidence, 0.7);
}

#[test]
fn test_invalid_rule_set_rejected() {
    let result = RuleSet::from_toml_str(
        r#"
version = 1
name = "broken"

[[rules]]
pattern = '(unclosed'
category = "domain_keyword"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_complexity_levels() {
    let scorer = ComplexityScorer::new(RuleSet::embedded(ResearchMode::Deep).unwrap());

    let simple = scorer.score("¿Qué es un contrato?");
    assert_eq!(simple.level, ComplexityLevel::Simple);
    assert_eq!(simple.result_count(), 2);

    let moderate = scorer.score("plazo para la demanda laboral");
    assert_eq!(moderate.score, 2);
    assert_eq!(moderate.level, ComplexityLevel::Moderate);
    assert_eq!(moderate.result_count(), 3);

    let complex = scorer.score("jurisprudencia de la Suprema Corte sobre el artículo 14 en materia penal");
    assert!(complex.score >= 4);
    assert_eq!(complex.level, ComplexityLevel::Complex);
    assert_eq!(complex.result_count(), 5);
    assert!(complex.factors.contains(&"jurisprudence".to_string()));
}
