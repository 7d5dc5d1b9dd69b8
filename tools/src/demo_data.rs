//! Deterministic demo expenses for scan-runner.
//!
//! Same seed, same expenses. Ordinary spend is drawn per category, then a
//! handful of known anomalies are planted so every rule has something to
//! find.

use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rust_decimal::Decimal;
use sentinel_core::expense::ExpenseRecord;

struct Category {
    id: &'static str,
    name: &'static str,
    /// Typical spend in whole currency units, as (low, high).
    range: (u64, u64),
    descriptions: &'static [&'static str],
}

static CATEGORIES: [Category; 4] = [
    Category {
        id: "travel",
        name: "Travel",
        range: (40, 450),
        descriptions: &["Taxi", "Train ticket", "Hotel night", "Airport parking"],
    },
    Category {
        id: "meals",
        name: "Meals",
        range: (12, 90),
        descriptions: &["Team lunch", "Client dinner", "Coffee meeting"],
    },
    Category {
        id: "office",
        name: "Office supplies",
        range: (5, 180),
        descriptions: &["Printer paper", "Monitor cable", "Notebooks", "Desk lamp"],
    },
    Category {
        id: "software",
        name: "Software",
        range: (10, 300),
        descriptions: &["IDE licence", "Cloud credits", "Design tool seat"],
    },
];

static SUBMITTERS: [(&str, &str); 5] = [
    ("u-ada", "Ada Byron"),
    ("u-grace", "Grace Hopper"),
    ("u-linus", "Linus Park"),
    ("u-mae", "Mae Jemison"),
    ("u-omar", "Omar Haddad"),
];

static DEPARTMENTS: [&str; 3] = ["Engineering", "Sales", "Operations"];

pub struct DemoRng {
    inner: Pcg64Mcg,
}

impl DemoRng {
    pub fn new(seed: u64) -> Self {
        Self { inner: Pcg64Mcg::seed_from_u64(seed) }
    }

    /// Roll a u64 in [0, n).
    fn below(&mut self, n: u64) -> u64 {
        self.inner.next_u64() % n
    }

    fn between(&mut self, low: u64, high: u64) -> u64 {
        low + self.below(high - low + 1)
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.below(items.len() as u64) as usize]
    }
}

/// `count` ordinary expenses submitted within the last `days` days,
/// followed by the planted anomalies.
pub fn generate(seed: u64, count: usize, days: u32, now: DateTime<Utc>) -> Vec<ExpenseRecord> {
    let mut rng = DemoRng::new(seed);
    let window_minutes = u64::from(days.max(1)) * 24 * 60;
    let mut expenses = Vec::with_capacity(count + 8);

    for n in 0..count {
        let category = rng.pick(&CATEGORIES);
        let (submitter_id, submitter_name) = *rng.pick(&SUBMITTERS);
        // Cents keep ordinary spend off the round-amount rule.
        let cents = rng.between(1, 99);
        let units = rng.between(category.range.0, category.range.1);
        let created_at = now - Duration::minutes(rng.below(window_minutes) as i64);
        expenses.push(ExpenseRecord {
            id: format!("exp-{seed}-{n:04}"),
            description: (*rng.pick(category.descriptions)).to_string(),
            amount: Decimal::new((units * 100 + cents) as i64, 2),
            expense_date: created_at.date_naive(),
            department: Some((*rng.pick(&DEPARTMENTS)).to_string()),
            status: "submitted".to_string(),
            submitter_id: Some(submitter_id.to_string()),
            submitter_name: Some(submitter_name.to_string()),
            category_id: Some(category.id.to_string()),
            category_name: Some(category.name.to_string()),
            created_at,
        });
    }

    plant_anomalies(&mut expenses, seed, now);
    expenses
}

fn planted(
    seed: u64,
    tag: &str,
    description: &str,
    amount: Decimal,
    submitter: (&str, &str),
    category: &Category,
    created_at: DateTime<Utc>,
) -> ExpenseRecord {
    ExpenseRecord {
        id: format!("exp-{seed}-{tag}"),
        description: description.to_string(),
        amount,
        expense_date: created_at.date_naive(),
        department: Some("Sales".to_string()),
        status: "submitted".to_string(),
        submitter_id: Some(submitter.0.to_string()),
        submitter_name: Some(submitter.1.to_string()),
        category_id: Some(category.id.to_string()),
        category_name: Some(category.name.to_string()),
        created_at,
    }
}

fn plant_anomalies(expenses: &mut Vec<ExpenseRecord>, seed: u64, now: DateTime<Utc>) {
    let travel = &CATEGORIES[0];
    let software = &CATEGORIES[3];
    let day_ago = now - Duration::days(1);

    // Same taxi claimed twice on the same day.
    expenses.push(planted(seed, "dup-a", "Taxi", Decimal::new(12000, 2), SUBMITTERS[0], travel, day_ago));
    expenses.push(planted(
        seed,
        "dup-b",
        "taxi",
        Decimal::new(12000, 2),
        SUBMITTERS[0],
        travel,
        day_ago + Duration::hours(3),
    ));

    // Three claims inside ten minutes.
    for i in 0..3 {
        expenses.push(planted(
            seed,
            &format!("burst-{i}"),
            "Cloud credits",
            Decimal::new(4_150 + i * 100, 2),
            SUBMITTERS[2],
            software,
            now - Duration::hours(6) + Duration::minutes(i * 5),
        ));
    }

    // Just under the 500 approval limit.
    expenses.push(planted(seed, "gaming", "Hotel night", Decimal::new(49_500, 2), SUBMITTERS[3], travel, day_ago));

    // Far above anything else in travel, and a round number.
    expenses.push(planted(seed, "outlier", "Charter flight", Decimal::from(9_000), SUBMITTERS[4], travel, day_ago));
}
