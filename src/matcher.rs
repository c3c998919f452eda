//! First-fit pairing of a joining user against the waiting queue.

use crate::{
    error::Result,
    model::{now, Gender, LookingFor, QueueEntry},
    proto::{JoinRequest, MatchOutcome},
    store::{MatchStore, QueueScan},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatcherConfig {
    /// How many interest-overlapping waiters the first pass looks at.
    pub interest_scan_limit: usize,
    /// How many waiters the fallback pass looks at.
    pub fallback_scan_limit: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            interest_scan_limit: 10,
            fallback_scan_limit: 30,
        }
    }
}

fn accepts(is_premium: bool, looking_for: LookingFor, other: Gender) -> bool {
    // free users cannot filter
    !is_premium || looking_for.accepts(other)
}

/// Both directions of the premium gender filter.
pub fn is_gender_match(joiner: &JoinRequest, candidate: &QueueEntry) -> bool {
    accepts(joiner.is_premium, joiner.looking_for, candidate.gender)
        && accepts(candidate.is_premium, candidate.looking_for, joiner.gender)
}

/// Both directions of the premium country filter. A waiting premium user's
/// stored country only admits joiners that list the same country.
pub fn is_country_match(joiner: &JoinRequest, candidate: &QueueEntry) -> bool {
    let joiner_ok = !joiner.is_premium
        || joiner.countries.is_empty()
        || candidate
            .country
            .as_ref()
            .is_some_and(|country| joiner.countries.contains(country));
    let candidate_ok = !candidate.is_premium
        || candidate
            .country
            .as_ref()
            .is_none_or(|country| joiner.countries.contains(country));
    joiner_ok && candidate_ok
}

pub fn is_compatible(joiner: &JoinRequest, candidate: &QueueEntry) -> bool {
    is_gender_match(joiner, candidate) && is_country_match(joiner, candidate)
}

pub fn shared_interests(joiner: &JoinRequest, candidate: &QueueEntry) -> Vec<String> {
    candidate
        .interests
        .iter()
        .filter(|interest| joiner.interests.contains(interest))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Pairs the joiner with the first compatible waiter, or enqueues them.
    pub async fn join<S>(&self, store: &S, req: JoinRequest) -> Result<MatchOutcome>
    where
        S: MatchStore + ?Sized,
    {
        let req = req.normalized()?;

        if let Some(room) = store.active_room_for(&req.user_id).await? {
            tracing::debug!(user_id = %req.user_id, room_id = %room.id, "re-join while in active room");
            return Ok(MatchOutcome::Matched { room, shared_interests: Vec::new() });
        }

        if !req.interests.is_empty() {
            let scan = QueueScan {
                exclude_user: &req.user_id,
                overlapping: Some(&req.interests),
                limit: self.config.interest_scan_limit,
            };
            if let Some(outcome) = self.pair_first(store, &req, scan).await? {
                return Ok(outcome);
            }
        }

        let scan = QueueScan {
            exclude_user: &req.user_id,
            overlapping: None,
            limit: self.config.fallback_scan_limit,
        };
        if let Some(outcome) = self.pair_first(store, &req, scan).await? {
            return Ok(outcome);
        }

        let entry = QueueEntry {
            user_id: req.user_id.clone(),
            interests: req.interests.clone(),
            gender: req.gender,
            looking_for: req.looking_for,
            is_premium: req.is_premium,
            country: req.countries.first().cloned(),
            created_at: now(),
        };
        if !store.upsert_queue_entry(&entry).await? {
            // another joiner claimed this user while we scanned
            if let Some(room) = store.active_room_for(&req.user_id).await? {
                tracing::debug!(user_id = %req.user_id, room_id = %room.id, "paired while joining");
                return Ok(MatchOutcome::Matched { room, shared_interests: Vec::new() });
            }
            store.upsert_queue_entry(&entry).await?;
        }
        tracing::debug!(user_id = %req.user_id, premium = req.is_premium, "queued");

        Ok(MatchOutcome::Waiting)
    }

    async fn pair_first<S>(
        &self,
        store: &S,
        req: &JoinRequest,
        scan: QueueScan<'_>,
    ) -> Result<Option<MatchOutcome>>
    where
        S: MatchStore + ?Sized,
    {
        for candidate in store.scan_queue(scan).await? {
            if !is_compatible(req, &candidate) {
                continue;
            }

            let Some(room) = store.claim_pair(&candidate.user_id, &req.user_id, now()).await? else {
                tracing::debug!(candidate = %candidate.user_id, "candidate claimed concurrently");
                continue;
            };

            tracing::info!(
                room_id = %room.id,
                waiting = %candidate.user_id,
                joiner = %req.user_id,
                "match formed"
            );
            return Ok(Some(MatchOutcome::Matched {
                shared_interests: shared_interests(req, &candidate),
                room,
            }));
        }
        Ok(None)
    }

    /// Polled by a waiting user until someone else's join pairs them.
    pub async fn check<S>(&self, store: &S, user_id: &str) -> Result<MatchOutcome>
    where
        S: MatchStore + ?Sized,
    {
        Ok(match store.active_room_for(user_id).await? {
            Some(room) => MatchOutcome::Matched { room, shared_interests: Vec::new() },
            None => MatchOutcome::Waiting,
        })
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use super::*;
    use crate::store::MemoryStore;

    fn waiting(user_id: &str, gender: Gender, premium: bool, created_at: OffsetDateTime) -> QueueEntry {
        QueueEntry {
            user_id: user_id.into(),
            interests: vec![],
            gender,
            looking_for: LookingFor::Everyone,
            is_premium: premium,
            country: None,
            created_at,
        }
    }

    fn matched(outcome: MatchOutcome) -> (crate::model::Room, Vec<String>) {
        match outcome {
            MatchOutcome::Matched { room, shared_interests } => (room, shared_interests),
            MatchOutcome::Waiting => panic!("expected a match"),
        }
    }

    #[tokio::test]
    async fn test_first_joiner_waits_second_is_paired() {
        let store = MemoryStore::new();
        let matcher = Matcher::default();

        let a = JoinRequest::new("a", Gender::Male).with_interests(["music"]);
        assert_eq!(matcher.join(&store, a).await.unwrap(), MatchOutcome::Waiting);
        assert_eq!(matcher.check(&store, "a").await.unwrap(), MatchOutcome::Waiting);

        let b = JoinRequest::new("b", Gender::Female).with_interests(["music", "art"]);
        let (room, shared) = matched(matcher.join(&store, b).await.unwrap());
        assert_eq!(shared, vec!["music"]);
        assert_eq!((room.user1_id.as_str(), room.user2_id.as_str()), ("a", "b"));
        assert_eq!(store.queue_len().await.unwrap(), 0);

        let (polled, _) = matched(matcher.check(&store, "a").await.unwrap());
        assert_eq!(polled.id, room.id);
    }

    #[tokio::test]
    async fn test_rejoin_returns_active_room() {
        let store = MemoryStore::new();
        let matcher = Matcher::default();
        matcher.join(&store, JoinRequest::new("a", Gender::Male)).await.unwrap();
        let (room, _) = matched(matcher.join(&store, JoinRequest::new("b", Gender::Male)).await.unwrap());

        let (again, _) = matched(matcher.join(&store, JoinRequest::new("b", Gender::Male)).await.unwrap());
        assert_eq!(again.id, room.id);
        assert_eq!(store.active_room_count().await.unwrap(), 1);
        assert_eq!(store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_premium_waiter_preferred_over_older_free() {
        let store = MemoryStore::new();
        let t0 = OffsetDateTime::now_utc();
        store.upsert_queue_entry(&waiting("free1", Gender::Male, false, t0 + Duration::seconds(1))).await.unwrap();
        store.upsert_queue_entry(&waiting("free2", Gender::Male, false, t0 + Duration::seconds(2))).await.unwrap();
        store.upsert_queue_entry(&waiting("premium5", Gender::Male, true, t0 + Duration::seconds(5))).await.unwrap();

        let (room, _) = matched(
            Matcher::default()
                .join(&store, JoinRequest::new("j", Gender::Female))
                .await
                .unwrap(),
        );
        assert_eq!(room.user1_id, "premium5");
    }

    #[tokio::test]
    async fn test_premium_gender_filter_skips_longer_waiter() {
        let store = MemoryStore::new();
        let t0 = OffsetDateTime::now_utc();
        store.upsert_queue_entry(&waiting("b", Gender::Male, false, t0)).await.unwrap();
        let mut a = waiting("a", Gender::Male, true, t0 + Duration::seconds(1));
        a.looking_for = LookingFor::Female;
        store.upsert_queue_entry(&a).await.unwrap();

        let (room, _) = matched(
            Matcher::default()
                .join(&store, JoinRequest::new("c", Gender::Female))
                .await
                .unwrap(),
        );
        assert_eq!(room.user1_id, "a");
        assert!(store.queue_entry("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_incompatible_everywhere_enqueues() {
        let store = MemoryStore::new();
        let mut a = waiting("a", Gender::Male, true, OffsetDateTime::now_utc());
        a.looking_for = LookingFor::Female;
        store.upsert_queue_entry(&a).await.unwrap();

        let joiner = JoinRequest::new("m", Gender::Male);
        assert_eq!(Matcher::default().join(&store, joiner).await.unwrap(), MatchOutcome::Waiting);
        assert_eq!(store.queue_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_interest_overlap_beats_queue_age() {
        let store = MemoryStore::new();
        let t0 = OffsetDateTime::now_utc();
        store.upsert_queue_entry(&waiting("old", Gender::Male, false, t0)).await.unwrap();
        let mut fan = waiting("fan", Gender::Male, false, t0 + Duration::seconds(9));
        fan.interests = vec!["chess".into()];
        store.upsert_queue_entry(&fan).await.unwrap();

        let (room, shared) = matched(
            Matcher::default()
                .join(&store, JoinRequest::new("j", Gender::Other).with_interests(["Chess"]))
                .await
                .unwrap(),
        );
        assert_eq!(room.user1_id, "fan");
        assert_eq!(shared, vec!["chess"]);
    }

    #[tokio::test]
    async fn test_rejoin_with_new_attributes_keeps_one_entry() {
        let store = MemoryStore::new();
        let matcher = Matcher::default();
        matcher
            .join(&store, JoinRequest::new("a", Gender::Male).with_interests(["music"]))
            .await
            .unwrap();
        let premium = JoinRequest::new("a", Gender::Male)
            .with_interests(["films"])
            .premium(LookingFor::Other)
            .with_countries(["fr"]);
        matcher.join(&store, premium).await.unwrap();

        assert_eq!(store.queue_len().await.unwrap(), 1);
        let entry = store.queue_entry("a").await.unwrap().unwrap();
        assert_eq!(entry.interests, vec!["films"]);
        assert_eq!(entry.looking_for, LookingFor::Other);
        assert_eq!(entry.country.as_deref(), Some("FR"));
    }

    #[test]
    fn gender_match_checks_both_directions() {
        let t0 = OffsetDateTime::now_utc();
        let mut picky = waiting("p", Gender::Male, true, t0);
        picky.looking_for = LookingFor::Female;

        assert!(!is_gender_match(&JoinRequest::new("j", Gender::Male), &picky));
        assert!(is_gender_match(&JoinRequest::new("j", Gender::Female), &picky));

        // a free joiner's preference is ignored
        let mut free_picky = JoinRequest::new("j", Gender::Male);
        free_picky.looking_for = LookingFor::Female;
        assert!(is_gender_match(&free_picky, &waiting("w", Gender::Male, false, t0)));

        let premium_picky = JoinRequest::new("j", Gender::Male).premium(LookingFor::Female);
        assert!(!is_gender_match(&premium_picky, &waiting("w", Gender::Male, false, t0)));
    }

    #[test]
    fn country_filter_is_symmetric() {
        let t0 = OffsetDateTime::now_utc();
        let mut german = waiting("w", Gender::Other, false, t0);
        german.country = Some("DE".into());

        let wants_fr = JoinRequest::new("j", Gender::Other)
            .premium(LookingFor::Everyone)
            .with_countries(["FR"]);
        assert!(!is_country_match(&wants_fr, &german));
        let wants_de = JoinRequest::new("j", Gender::Other)
            .premium(LookingFor::Everyone)
            .with_countries(["DE"]);
        assert!(is_country_match(&wants_de, &german));

        german.is_premium = true;
        assert!(!is_country_match(&JoinRequest::new("j", Gender::Other), &german));
        assert!(is_country_match(&wants_de, &german));

        german.country = None;
        assert!(is_country_match(&JoinRequest::new("j", Gender::Other), &german));
    }
}
