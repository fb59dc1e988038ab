use crate::model::Visibility;

/// Authenticated context for the recommendation read. The outer transport
/// resolves tokens; by the time a request reaches us, roles are trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    Student { id: String },
    Teacher { id: String },
}

/// One survey as fetched for ranking. `owner_linked` is precomputed from the
/// teacher-student link table for student viewers and is false otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub owner_id: String,
    pub visibility: Visibility,
    pub created_at: String,
    pub response_count: i64,
    pub owner_linked: bool,
}

/// Priority tier per viewer role. `None` means not visible: the candidate is
/// dropped entirely, never ranked.
pub fn tier_for(viewer: &Viewer, c: &Candidate) -> Option<i64> {
    match viewer {
        Viewer::Anonymous => match c.visibility {
            Visibility::Public => Some(1),
            _ => None,
        },
        Viewer::Student { .. } => {
            if c.owner_linked && c.visibility != Visibility::Private {
                return Some(3);
            }
            match c.visibility {
                Visibility::Public => Some(2),
                Visibility::StudentsOnly => Some(1),
                Visibility::Private => None,
            }
        }
        Viewer::Teacher { id } => {
            if c.owner_id == *id {
                Some(3)
            } else if c.visibility == Visibility::Public {
                Some(1)
            } else {
                None
            }
        }
    }
}

/// Order visible candidates by tier, then response count, then recency, and
/// truncate to `limit`. Timestamps are RFC 3339 UTC, so string comparison is
/// chronological.
pub fn rank(viewer: &Viewer, candidates: Vec<Candidate>, limit: usize) -> Vec<(i64, Candidate)> {
    let mut ranked: Vec<(i64, Candidate)> = candidates
        .into_iter()
        .filter_map(|c| tier_for(viewer, &c).map(|t| (t, c)))
        .collect();
    ranked.sort_by(|(ta, a), (tb, b)| {
        tb.cmp(ta)
            .then_with(|| b.response_count.cmp(&a.response_count))
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.truncate(limit);
    ranked
}
