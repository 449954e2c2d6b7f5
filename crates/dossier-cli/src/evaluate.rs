// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Built-in evaluation personas.
//!
//! Each persona is a real-world public figure with a small expected-entity
//! set; the score is recall of those entities in the final state. This is a
//! smoke-level harness, not a benchmark.

use crate::wiring;

struct Persona {
    name: &'static str,
    role: &'static str,
    org: &'static str,
    difficulty: &'static str,
    expected_entities: &'static [&'static str],
    max_iterations: u32,
}

const PERSONAS: &[Persona] = &[
    Persona {
        name: "Jensen Huang",
        role: "CEO",
        org: "NVIDIA",
        difficulty: "easy",
        expected_entities: &["NVIDIA"],
        max_iterations: 3,
    },
    Persona {
        name: "Elizabeth Holmes",
        role: "Founder",
        org: "Theranos",
        difficulty: "medium",
        expected_entities: &["Theranos", "SEC"],
        max_iterations: 5,
    },
    Persona {
        name: "Jordan Belfort",
        role: "Founder",
        org: "Stratton Oakmont",
        difficulty: "hard",
        expected_entities: &["Stratton Oakmont", "SEC", "FBI"],
        max_iterations: 6,
    },
];

pub async fn run(persona_filter: Option<&str>, all: bool) -> anyhow::Result<()> {
    let selected: Vec<&Persona> = match (persona_filter, all) {
        (_, true) => PERSONAS.iter().collect(),
        (Some(filter), _) => {
            let filter_lower = filter.to_lowercase();
            let matches: Vec<&Persona> = PERSONAS
                .iter()
                .filter(|p| {
                    p.difficulty == filter_lower
                        || p.name.to_lowercase().contains(&filter_lower)
                })
                .collect();
            if matches.is_empty() {
                anyhow::bail!("no persona matches '{filter}'");
            }
            matches
        }
        (None, false) => vec![&PERSONAS[0]],
    };

    let engine = wiring::build_engine("outputs/eval", None, false, false)?;
    let mut total_score = 0.0;

    for persona in &selected {
        println!("── evaluating {} ({})", persona.name, persona.difficulty);
        let outcome = engine
            .investigate(
                persona.name,
                Some(persona.role.to_string()),
                Some(persona.org.to_string()),
                Some(persona.max_iterations),
            )
            .await?;

        let found = persona
            .expected_entities
            .iter()
            .filter(|expected| outcome.state.find_entity_by_name(expected).is_some())
            .count();
        let score = found as f64 / persona.expected_entities.len() as f64;
        total_score += score;
        println!(
            "   recall {found}/{} ({:.0}%), {} entities, {} risk flags, ${:.4}",
            persona.expected_entities.len(),
            score * 100.0,
            outcome.state.entities.len(),
            outcome.state.risk_flags.len(),
            outcome.state.estimated_cost_usd,
        );
    }

    println!(
        "overall: {:.0}% across {} persona(s)",
        total_score / selected.len() as f64 * 100.0,
        selected.len()
    );
    Ok(())
}
