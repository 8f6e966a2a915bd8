//! Survival and humane-endpoint reports

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;
use vivo_common::endpoint::{evaluate_endpoint, EndpointStatus};
use vivo_common::models::{Subject, SubjectStatus};
use vivo_common::survival::{kaplan_meier, SurvivalInput, SurvivalPoint};
use vivo_common::Result;

use crate::db::{experiments, observations, subjects, treatment_groups};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSurvival {
    pub treatment_group_id: i64,
    pub name: String,
    pub subjects: usize,
    pub curve: Vec<SurvivalPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurvivalReport {
    pub experiment_id: i64,
    pub subjects: usize,
    pub overall: Vec<SurvivalPoint>,
    pub groups: Vec<GroupSurvival>,
}

fn survival_inputs<'a>(cohort: impl Iterator<Item = &'a Subject>, start_date: NaiveDate) -> Vec<SurvivalInput> {
    cohort.map(|subject| subject.survival_input(start_date)).collect()
}

/// Kaplan-Meier curves for the whole experiment and for each treatment group
pub async fn survival_report(pool: &SqlitePool, experiment_id: i64) -> Result<SurvivalReport> {
    let mut conn = pool.acquire().await?;
    let experiment = experiments::require(&mut conn, experiment_id).await?;
    let cohort = subjects::list_for_experiment(&mut conn, experiment_id).await?;
    let groups = treatment_groups::list_for_experiment(&mut conn, experiment_id).await?;

    let overall = kaplan_meier(&survival_inputs(cohort.iter(), experiment.start_date));

    let groups = groups
        .into_iter()
        .map(|group| {
            let members: Vec<&Subject> = cohort
                .iter()
                .filter(|s| s.treatment_group_id == Some(group.id))
                .collect();
            GroupSurvival {
                treatment_group_id: group.id,
                name: group.name,
                subjects: members.len(),
                curve: kaplan_meier(&survival_inputs(members.into_iter(), experiment.start_date)),
            }
        })
        .collect();

    Ok(SurvivalReport {
        experiment_id,
        subjects: cohort.len(),
        overall,
        groups,
    })
}

/// Alive subject whose latest observation is at or past a humane endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointAlert {
    pub subject_id: i64,
    pub label: String,
    pub observation_date: NaiveDate,
    pub day_of_study: i64,
    pub weight_pct_change: Option<f64>,
    pub total_css: Option<i64>,
    pub status: EndpointStatus,
}

pub async fn endpoint_alerts(pool: &SqlitePool, experiment_id: i64) -> Result<Vec<EndpointAlert>> {
    let mut conn = pool.acquire().await?;
    let experiment = experiments::require(&mut conn, experiment_id).await?;
    let thresholds = experiment.endpoint_thresholds();
    let cohort = subjects::list_for_experiment(&mut conn, experiment_id).await?;
    let latest = observations::latest_for_alive_subjects(&mut conn, experiment_id).await?;

    let alerts = latest
        .into_iter()
        .filter_map(|observation| {
            let status = evaluate_endpoint(&observation.derived, &thresholds);
            if !status.any() {
                return None;
            }
            let subject = cohort
                .iter()
                .find(|s| s.id == observation.subject_id && s.status == SubjectStatus::Alive)?;
            Some(EndpointAlert {
                subject_id: subject.id,
                label: subject.label.clone(),
                observation_date: observation.observation_date,
                day_of_study: observation.derived.day_of_study,
                weight_pct_change: observation.derived.weight_pct_change,
                total_css: observation.derived.total_css,
                status,
            })
        })
        .collect();

    Ok(alerts)
}
