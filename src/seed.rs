//! Sample team and projects for demos and local runs.

use chrono::NaiveDate;
use tracing::info;

use crate::domain::{Priority, ProjectDraft, ResourceDraft, Seniority};
use crate::error::AllocationError;
use crate::service::AllocationService;

fn skills(list: &[&str]) -> std::collections::BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn date(y: i32, m: u32, d: u32) -> Result<NaiveDate, AllocationError> {
    NaiveDate::from_ymd_opt(y, m, d)
        .ok_or_else(|| AllocationError::Validation(format!("bad seed date {}-{}-{}", y, m, d)))
}

pub fn sample_resources() -> Vec<ResourceDraft> {
    let person = |name: &str, email: &str, role: &str, s: &[&str], hours: u32, seniority: Seniority| ResourceDraft {
        name: name.to_string(),
        email: email.to_string(),
        role: role.to_string(),
        skills: skills(s),
        availability: hours,
        seniority,
        location: None,
        timezone: None,
    };
    vec![
        person("Alice Johnson", "alice@talentflow.ai", "Frontend Developer", &["React", "TypeScript", "Next.js", "GraphQL"], 30, Seniority::Senior),
        person("Bob Williams", "bob@talentflow.ai", "Backend Developer", &["Node.js", "Python", "PostgreSQL", "Docker"], 40, Seniority::MidLevel),
        person("Charlie Brown", "charlie@talentflow.ai", "UI/UX Designer", &["Figma", "Prototyping", "User Research"], 20, Seniority::Junior),
        person("Diana Prince", "diana@talentflow.ai", "Project Manager", &["Agile", "Scrum", "Jira", "Risk Management"], 40, Seniority::Lead),
    ]
}

pub fn sample_projects() -> Result<Vec<ProjectDraft>, AllocationError> {
    Ok(vec![
        ProjectDraft {
            name: "Project Phoenix".into(),
            description: "A web app for tracking expenses.".into(),
            required_skills: skills(&["React", "Node.js", "Figma"]),
            start_date: date(2026, 7, 1)?,
            deadline: date(2026, 9, 30)?,
            priority: Priority::High,
        },
        ProjectDraft {
            name: "Project Neptune".into(),
            description: "A mobile app for social networking.".into(),
            required_skills: skills(&["React Native", "Python", "GraphQL"]),
            start_date: date(2026, 8, 1)?,
            deadline: date(2026, 10, 15)?,
            priority: Priority::Medium,
        },
        ProjectDraft {
            name: "Project Titan".into(),
            description: "Data analysis dashboard for sales.".into(),
            required_skills: skills(&["Python", "SQL", "Tableau"]),
            start_date: date(2026, 6, 1)?,
            deadline: date(2026, 8, 25)?,
            priority: Priority::Low,
        },
    ])
}

/// Inserts whatever sample records are missing. Resources are matched by
/// email and projects by name, so running it twice is harmless.
pub async fn seed(service: &AllocationService) -> Result<(usize, usize), AllocationError> {
    let mut resources = 0;
    for draft in sample_resources() {
        match service.find_resource_by_email(&draft.email).await {
            Ok(_) => continue,
            Err(AllocationError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        service.register_resource(draft).await?;
        resources += 1;
    }

    let existing: Vec<String> = service.list_projects().await?.into_iter().map(|p| p.name).collect();
    let mut projects = 0;
    for draft in sample_projects()? {
        if !existing.contains(&draft.name) {
            service.create_project(draft).await?;
            projects += 1;
        }
    }

    info!("Seeded {} resource(s) and {} project(s)", resources, projects);
    Ok((resources, projects))
}
