// src/experiments/ab.rs — A/B experiment lifecycle and registry

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::significance::{yates_chi_squared, Observation, SignificanceResult, SignificanceTester, Variant};
use crate::infra::errors::{HabitusError, Result};
use crate::storage::{ExperimentRow, SharedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Running,
    Completed,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbExperiment {
    pub id: String,
    pub variant_a: Value,
    pub variant_b: Value,
    pub status: ExperimentStatus,
    pub winner: Option<Variant>,
    pub a: Observation,
    pub b: Observation,
    /// p-value at promotion time.
    pub p_value: Option<f64>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl AbExperiment {
    pub fn new(id: &str, variant_a: Value, variant_b: Value) -> Self {
        Self {
            id: id.to_string(),
            variant_a,
            variant_b,
            status: ExperimentStatus::Running,
            winner: None,
            a: Observation::default(),
            b: Observation::default(),
            p_value: None,
            created_at: Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    pub fn observation(&self, variant: Variant) -> Observation {
        match variant {
            Variant::A => self.a,
            Variant::B => self.b,
        }
    }

    /// Count one exposure of `variant`. Completed experiments are frozen.
    pub fn record(&mut self, variant: Variant, overridden: bool) -> Result<()> {
        if !self.is_running() {
            return Err(HabitusError::validation(
                "experiment",
                format!("'{}' is already completed", self.id),
            ));
        }
        let obs = match variant {
            Variant::A => &mut self.a,
            Variant::B => &mut self.b,
        };
        obs.total += 1;
        if overridden {
            obs.overrides += 1;
        }
        Ok(())
    }

    // Running → Completed only.
    fn complete(&mut self, winner: Variant, p_value: f64) {
        if self.is_running() {
            self.status = ExperimentStatus::Completed;
            self.winner = Some(winner);
            self.p_value = Some(p_value);
            self.completed_at = Some(Utc::now().to_rfc3339());
        }
    }

    /// The outcome recorded at promotion.
    fn recorded_result(&self) -> SignificanceResult {
        SignificanceResult {
            significant: true,
            winner: self.winner,
            p_value: self.p_value.unwrap_or(0.0),
            chi_squared: yates_chi_squared(self.a, self.b).unwrap_or(0.0),
            sample_size_a: self.a.total,
            sample_size_b: self.b.total,
            override_rate_a: self.a.override_rate().unwrap_or(0.0),
            override_rate_b: self.b.override_rate().unwrap_or(0.0),
        }
    }

    fn to_row(&self) -> Result<ExperimentRow> {
        Ok(ExperimentRow {
            id: self.id.clone(),
            variant_a: serde_json::to_string(&self.variant_a)?,
            variant_b: serde_json::to_string(&self.variant_b)?,
            status: self.status.as_str().to_string(),
            winner: self.winner.map(|w| w.as_str().to_string()),
            a_overrides: self.a.overrides as i64,
            a_total: self.a.total as i64,
            b_overrides: self.b.overrides as i64,
            b_total: self.b.total as i64,
            p_value: self.p_value,
            created_at: self.created_at.clone(),
            completed_at: self.completed_at.clone(),
        })
    }

    fn from_row(row: ExperimentRow) -> Result<Self> {
        let status = ExperimentStatus::parse(&row.status).ok_or_else(|| {
            HabitusError::Storage(format!("experiment '{}' has unknown status '{}'", row.id, row.status))
        })?;
        let winner = match row.winner {
            Some(ref w) => Some(Variant::parse(w).ok_or_else(|| {
                HabitusError::Storage(format!("experiment '{}' has unknown winner '{w}'", row.id))
            })?),
            None => None,
        };
        Ok(Self {
            variant_a: serde_json::from_str(&row.variant_a)?,
            variant_b: serde_json::from_str(&row.variant_b)?,
            status,
            winner,
            a: Observation::new(row.a_overrides.max(0) as u64, row.a_total.max(0) as u64),
            b: Observation::new(row.b_overrides.max(0) as u64, row.b_total.max(0) as u64),
            p_value: row.p_value,
            created_at: row.created_at,
            completed_at: row.completed_at,
            id: row.id,
        })
    }
}

/// Running and completed experiments behind one lock.
pub struct ExperimentRegistry {
    experiments: Mutex<BTreeMap<String, AbExperiment>>,
    tester: SignificanceTester,
    persist: Option<SharedStore>,
}

impl ExperimentRegistry {
    pub fn new(tester: SignificanceTester) -> Self {
        Self {
            experiments: Mutex::new(BTreeMap::new()),
            tester,
            persist: None,
        }
    }

    pub fn with_store(mut self, persist: SharedStore) -> Result<Self> {
        let rows = persist
            .lock()
            .map_err(|_| HabitusError::LockPoisoned("storage"))?
            .load_experiments()
            .map_err(|e| HabitusError::Storage(e.to_string()))?;
        {
            let experiments = self
                .experiments
                .get_mut()
                .map_err(|_| HabitusError::LockPoisoned("experiments"))?;
            for row in rows {
                let exp = AbExperiment::from_row(row)?;
                experiments.insert(exp.id.clone(), exp);
            }
        }
        self.persist = Some(persist);
        Ok(self)
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, AbExperiment>>> {
        self.experiments
            .lock()
            .map_err(|_| HabitusError::LockPoisoned("experiments"))
    }

    pub fn start(&self, id: &str, variant_a: Value, variant_b: Value) -> Result<AbExperiment> {
        if id.trim().is_empty() {
            return Err(HabitusError::validation("experiment", "id must not be empty"));
        }
        let mut experiments = self.lock()?;
        if experiments.contains_key(id) {
            return Err(HabitusError::validation(
                "experiment",
                format!("'{id}' already exists"),
            ));
        }
        let exp = AbExperiment::new(id, variant_a, variant_b);
        self.write_through(&exp);
        experiments.insert(id.to_string(), exp.clone());
        tracing::info!("Started experiment {}", id);
        Ok(exp)
    }

    pub fn record(&self, id: &str, variant: Variant, overridden: bool) -> Result<AbExperiment> {
        let mut experiments = self.lock()?;
        let exp = experiments
            .get_mut(id)
            .ok_or_else(|| HabitusError::not_found("experiment", id))?;
        exp.record(variant, overridden)?;
        self.write_through(exp);
        Ok(exp.clone())
    }

    /// Test the experiment; a significant result promotes it to completed.
    /// A completed experiment reports its recorded outcome.
    pub fn check_significance(&self, id: &str) -> Result<SignificanceResult> {
        let mut experiments = self.lock()?;
        let exp = experiments
            .get_mut(id)
            .ok_or_else(|| HabitusError::not_found("experiment", id))?;
        if !exp.is_running() {
            return Ok(exp.recorded_result());
        }

        let result = self.tester.test(exp.a, exp.b)?;
        if let (true, Some(winner)) = (result.significant, result.winner) {
            exp.complete(winner, result.p_value);
            self.write_through(exp);
            tracing::info!(
                "Experiment {} completed: variant {} wins (p = {:.4})",
                id,
                winner,
                result.p_value
            );
        }
        Ok(result)
    }

    pub fn get(&self, id: &str) -> Result<AbExperiment> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| HabitusError::not_found("experiment", id))
    }

    pub fn list(&self) -> Result<Vec<AbExperiment>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn write_through(&self, exp: &AbExperiment) {
        let Some(ref persist) = self.persist else {
            return;
        };
        let result = exp.to_row().and_then(|row| match persist.lock() {
            Ok(db) => db
                .upsert_experiment(&row)
                .map_err(|e| HabitusError::Storage(e.to_string())),
            Err(_) => Err(HabitusError::LockPoisoned("storage")),
        });
        if let Err(e) = result {
            tracing::warn!("Persisting experiment {} failed: {}", exp.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use serde_json::json;

    fn feed(reg: &ExperimentRegistry, id: &str, variant: Variant, overrides: u64, total: u64) {
        for i in 0..total {
            reg.record(id, variant, i < overrides).unwrap();
        }
    }

    #[test]
    fn test_lifecycle_promotes_once() {
        let reg = ExperimentRegistry::new(SignificanceTester::default());
        reg.start("exp1", json!({"delay": 30}), json!({"delay": 120})).unwrap();
        feed(&reg, "exp1", Variant::A, 5, 25);
        feed(&reg, "exp1", Variant::B, 20, 25);

        let r = reg.check_significance("exp1").unwrap();
        assert!(r.significant);
        assert_eq!(r.winner, Some(Variant::A));

        let exp = reg.get("exp1").unwrap();
        assert_eq!(exp.status, ExperimentStatus::Completed);
        assert_eq!(exp.winner, Some(Variant::A));

        // Frozen: no more samples, same outcome.
        assert!(reg.record("exp1", Variant::B, false).is_err());
        let again = reg.check_significance("exp1").unwrap();
        assert_eq!(again.winner, Some(Variant::A));
        assert_eq!(again.p_value, r.p_value);
    }

    #[test]
    fn test_not_enough_samples_stays_running() {
        let reg = ExperimentRegistry::new(SignificanceTester::default());
        reg.start("exp", json!("a"), json!("b")).unwrap();
        feed(&reg, "exp", Variant::A, 0, 10);
        feed(&reg, "exp", Variant::B, 10, 10);
        let r = reg.check_significance("exp").unwrap();
        assert!(!r.significant);
        assert!(reg.get("exp").unwrap().is_running());
    }

    #[test]
    fn test_unknown_and_duplicate() {
        let reg = ExperimentRegistry::new(SignificanceTester::default());
        assert!(matches!(
            reg.check_significance("nope"),
            Err(HabitusError::NotFound { .. })
        ));
        reg.start("x", json!(1), json!(2)).unwrap();
        assert!(reg.start("x", json!(1), json!(2)).is_err());
        assert!(reg.start(" ", json!(1), json!(2)).is_err());
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[test]
    fn test_persisted_and_reloaded() {
        let db = Database::in_memory().unwrap().into_shared();
        let reg = ExperimentRegistry::new(SignificanceTester::default())
            .with_store(db.clone())
            .unwrap();
        reg.start("exp", json!({"mode": "auto"}), json!({"mode": "ask"})).unwrap();
        feed(&reg, "exp", Variant::A, 5, 25);
        feed(&reg, "exp", Variant::B, 20, 25);
        reg.check_significance("exp").unwrap();

        let reloaded = ExperimentRegistry::new(SignificanceTester::default())
            .with_store(db)
            .unwrap();
        let exp = reloaded.get("exp").unwrap();
        assert_eq!(exp.status, ExperimentStatus::Completed);
        assert_eq!(exp.a, Observation::new(5, 25));
        assert_eq!(exp.variant_b, json!({"mode": "ask"}));
        assert_eq!(exp, reg.get("exp").unwrap());
    }
}
