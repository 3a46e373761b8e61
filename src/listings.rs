use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::auth::session::Session;
use crate::error::{AppError, AppResult};
use crate::storage::{ChangeBus, DurableStorage, Reconcile, SyncedCollection, PROPERTIES_KEY};
use crate::validation::FieldErrors;

/// Submissions with fewer images are refused.
pub const MIN_IMAGES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Pending,
    Approved,
    Rejected,
}

impl ListingStatus {
    /// Moderation is one-way: only a pending listing can be decided.
    pub fn can_transition_to(self, next: ListingStatus) -> bool {
        self == ListingStatus::Pending && next != ListingStatus::Pending
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Approved => "approved",
            ListingStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub title: String,
    /// Free-form, e.g. "500000" or "₦2.5m".
    pub price: String,
    pub location: String,
    pub property_type: String,
    pub description: String,
    pub contact: String,
    pub email: String,
    pub images: Vec<String>,
    pub seller_id: String,
    pub seller_name: String,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.seller_id == user_id
    }

    /// Apartments are let through agents, everything else is sold by the owner.
    pub fn contact_label(&self) -> &'static str {
        if self.property_type.eq_ignore_ascii_case("apartment") {
            "Agent"
        } else {
            "Owner"
        }
    }
}

/// Seller submission as received from the dashboard form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewListing {
    pub title: Option<String>,
    pub price: String,
    pub location: String,
    pub property_type: String,
    pub description: String,
    pub contact: String,
    pub email: String,
    pub images: Vec<String>,
}

impl NewListing {
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = FieldErrors::default();
        errors.require("price", &self.price, "Price is required");
        errors.require("location", &self.location, "Location is required");
        errors.require("propertyType", &self.property_type, "Property type is required");
        errors.require("description", &self.description, "Description is required");
        if self.images.len() < MIN_IMAGES {
            errors.add("images", "Please upload at least 4 images of the property");
        }
        errors.into_result()
    }

    fn title(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => format!("{} in {}", self.property_type.trim(), self.location.trim()),
        }
    }
}

/// Browse categories offered on the buyer home view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    BuyProperty,
    RentApartment,
    BuyLand,
}

impl Category {
    pub fn matches(&self, property_type: &str) -> bool {
        let property_type = property_type.to_lowercase();
        match self {
            Category::BuyProperty => property_type == "house" || property_type == "apartment",
            Category::RentApartment => property_type == "apartment",
            Category::BuyLand => property_type == "land",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListingQuery {
    pub q: Option<String>,
    pub category: Option<Category>,
}

impl ListingQuery {
    fn matches(&self, listing: &Listing) -> bool {
        if let Some(category) = self.category {
            if !category.matches(&listing.property_type) {
                return false;
            }
        }

        match self.q.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => {
                let q = q.to_lowercase();
                [
                    &listing.title,
                    &listing.location,
                    &listing.property_type,
                    &listing.description,
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&q))
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingStats {
    pub total_listings: usize,
    pub pending_approvals: usize,
    pub approved_properties: usize,
}

/// The canonical listing collection, persisted under the `properties` key.
pub struct ListingStore {
    listings: SyncedCollection<Listing>,
}

impl ListingStore {
    pub fn open(storage: Arc<dyn DurableStorage>, bus: ChangeBus) -> AppResult<Self> {
        Ok(Self {
            listings: SyncedCollection::open(PROPERTIES_KEY, storage, bus)?,
        })
    }

    /// Validate and append a submission. New listings always start pending.
    pub fn add_listing(&self, data: NewListing, seller: &Session) -> AppResult<Listing> {
        data.validate()?;

        let listing = Listing {
            id: uuid::Uuid::now_v7().to_string(),
            title: data.title(),
            price: data.price.trim().to_string(),
            location: data.location.trim().to_string(),
            property_type: data.property_type.trim().to_string(),
            description: data.description,
            contact: data.contact,
            email: data.email,
            images: data.images,
            seller_id: seller.user_id.clone(),
            seller_name: seller.name.clone(),
            status: ListingStatus::Pending,
            created_at: Utc::now(),
        };

        self.listings.mutate(|listings| {
            listings.push(listing.clone());
            Ok(())
        })?;

        tracing::info!("Listing {} submitted by {}", listing.id, listing.seller_id);
        Ok(listing)
    }

    pub fn update_status(&self, id: &str, status: ListingStatus) -> AppResult<Listing> {
        let listing = self.listings.mutate(|listings| {
            let listing = listings
                .iter_mut()
                .find(|l| l.id == id)
                .ok_or(AppError::NotFound)?;
            if !listing.status.can_transition_to(status) {
                return Err(AppError::BadRequest(format!(
                    "Listing is already {}",
                    listing.status
                )));
            }
            listing.status = status;
            Ok(listing.clone())
        });

        match &listing {
            Ok(l) => tracing::info!("Listing {} is now {}", l.id, l.status),
            Err(AppError::NotFound) => tracing::warn!("Status update for unknown listing {}", id),
            Err(_) => {}
        }
        listing
    }

    pub fn get(&self, id: &str) -> AppResult<Option<Listing>> {
        self.listings
            .with_items(|listings| listings.iter().find(|l| l.id == id).cloned())
    }

    pub fn all(&self) -> AppResult<Vec<Listing>> {
        self.listings.items()
    }

    pub fn with_status(&self, status: ListingStatus) -> AppResult<Vec<Listing>> {
        self.filtered(|l| l.status == status)
    }

    pub fn approved(&self) -> AppResult<Vec<Listing>> {
        self.with_status(ListingStatus::Approved)
    }

    pub fn pending(&self) -> AppResult<Vec<Listing>> {
        self.with_status(ListingStatus::Pending)
    }

    pub fn owned_by(&self, seller_id: &str) -> AppResult<Vec<Listing>> {
        self.filtered(|l| l.is_owned_by(seller_id))
    }

    pub fn pending_owned_by(&self, seller_id: &str) -> AppResult<Vec<Listing>> {
        self.filtered(|l| l.is_owned_by(seller_id) && l.status == ListingStatus::Pending)
    }

    /// Approved listings narrowed by category and free-text query.
    pub fn search(&self, query: &ListingQuery) -> AppResult<Vec<Listing>> {
        self.filtered(|l| l.status == ListingStatus::Approved && query.matches(l))
    }

    pub fn stats(&self) -> AppResult<ListingStats> {
        self.listings.with_items(|listings| ListingStats {
            total_listings: listings.len(),
            pending_approvals: listings
                .iter()
                .filter(|l| l.status == ListingStatus::Pending)
                .count(),
            approved_properties: listings
                .iter()
                .filter(|l| l.status == ListingStatus::Approved)
                .count(),
        })
    }

    /// Manual refresh: replace the cache with whatever storage holds now.
    pub fn reload(&self) -> AppResult<()> {
        self.listings.reload()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.listings.subscribe()
    }

    fn filtered(&self, keep: impl Fn(&Listing) -> bool) -> AppResult<Vec<Listing>> {
        self.listings
            .with_items(|listings| listings.iter().filter(|l| keep(l)).cloned().collect())
    }
}

impl Reconcile for ListingStore {
    fn key(&self) -> &'static str {
        self.listings.key()
    }

    fn reconcile(&self) -> AppResult<bool> {
        self.listings.reconcile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::users::Role;

    fn store() -> ListingStore {
        ListingStore::open(Arc::new(MemoryStorage::new()), ChangeBus::new()).unwrap()
    }

    fn seller(id: &str, name: &str) -> Session {
        Session {
            user_id: id.to_string(),
            name: name.to_string(),
            email: format!("{}@example.com", id),
            role: Role::Seller,
        }
    }

    fn submission(property_type: &str, location: &str, images: usize) -> NewListing {
        NewListing {
            title: None,
            price: "500000".to_string(),
            location: location.to_string(),
            property_type: property_type.to_string(),
            description: "Three bedroom with sea view".to_string(),
            contact: "+234 800 000 0000".to_string(),
            email: "owner@example.com".to_string(),
            images: (0..images).map(|i| format!("img-{}.jpg", i)).collect(),
        }
    }

    fn approve(store: &ListingStore, property_type: &str, location: &str) -> Listing {
        let listing = store
            .add_listing(submission(property_type, location, 4), &seller("s1", "Sam"))
            .unwrap();
        store.update_status(&listing.id, ListingStatus::Approved).unwrap()
    }

    #[test]
    fn new_listing_is_pending_with_generated_fields() {
        let store = store();
        let listing = store
            .add_listing(submission("apartment", "Lekki", 4), &seller("s1", "Sam"))
            .unwrap();

        assert_eq!(listing.status, ListingStatus::Pending);
        assert_eq!(listing.title, "apartment in Lekki");
        assert_eq!(listing.seller_name, "Sam");
        assert_eq!(listing.seller_id, "s1");
        assert!(uuid::Uuid::parse_str(&listing.id).is_ok());
        assert_eq!(store.pending().unwrap(), vec![listing]);
    }

    #[test]
    fn explicit_title_is_kept() {
        let mut data = submission("house", "Ikoyi", 4);
        data.title = Some("Waterfront villa".to_string());
        let listing = store().add_listing(data, &seller("s1", "Sam")).unwrap();
        assert_eq!(listing.title, "Waterfront villa");
    }

    #[test]
    fn three_images_are_rejected_four_accepted() {
        let store = store();
        let err = store
            .add_listing(submission("house", "Ikoyi", 3), &seller("s1", "Sam"))
            .unwrap_err();
        match err {
            AppError::Validation(errors) => assert!(errors.get("images").is_some()),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(store.all().unwrap().is_empty());

        assert!(store
            .add_listing(submission("house", "Ikoyi", 4), &seller("s1", "Sam"))
            .is_ok());
    }

    #[test]
    fn missing_required_fields_are_reported_together() {
        let err = store()
            .add_listing(NewListing::default(), &seller("s1", "Sam"))
            .unwrap_err();
        let AppError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        for field in ["price", "location", "propertyType", "description", "images"] {
            assert!(errors.get(field).is_some(), "missing error for {}", field);
        }
    }

    #[test]
    fn approval_moves_listing_between_views() {
        let store = store();
        let listing = store
            .add_listing(submission("apartment", "Lekki", 4), &seller("s1", "Sam"))
            .unwrap();

        store.update_status(&listing.id, ListingStatus::Approved).unwrap();

        assert!(store.approved().unwrap().iter().any(|l| l.id == listing.id));
        assert!(store.pending().unwrap().iter().all(|l| l.id != listing.id));
    }

    #[test]
    fn rejected_listing_is_in_neither_view() {
        let store = store();
        let listing = store
            .add_listing(submission("land", "Epe", 4), &seller("s1", "Sam"))
            .unwrap();
        store.update_status(&listing.id, ListingStatus::Rejected).unwrap();

        assert!(store.approved().unwrap().is_empty());
        assert!(store.pending().unwrap().is_empty());
        assert_eq!(store.with_status(ListingStatus::Rejected).unwrap().len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let result = store().update_status("missing", ListingStatus::Approved);
        assert!(matches!(result, Err(AppError::NotFound)));
    }

    #[test]
    fn moderated_listing_cannot_change_again() {
        let store = store();
        let listing = approve(&store, "house", "Ikoyi");

        let back = store.update_status(&listing.id, ListingStatus::Pending);
        assert!(matches!(back, Err(AppError::BadRequest(_))));
        let flip = store.update_status(&listing.id, ListingStatus::Rejected);
        assert!(matches!(flip, Err(AppError::BadRequest(_))));
        assert_eq!(
            store.get(&listing.id).unwrap().unwrap().status,
            ListingStatus::Approved
        );
    }

    #[test]
    fn ownership_is_by_seller_id_not_name() {
        let store = store();
        store
            .add_listing(submission("house", "Ikoyi", 4), &seller("s1", "Sam"))
            .unwrap();
        store
            .add_listing(submission("land", "Epe", 4), &seller("s2", "Sam"))
            .unwrap();

        assert_eq!(store.owned_by("s1").unwrap().len(), 1);
        assert_eq!(store.owned_by("s2").unwrap().len(), 1);
        assert_eq!(store.pending_owned_by("s1").unwrap().len(), 1);
    }

    #[test]
    fn search_filters_approved_by_category_and_text() {
        let store = store();
        approve(&store, "House", "Ikoyi");
        approve(&store, "apartment", "Lekki Phase 1");
        approve(&store, "land", "Epe");
        store
            .add_listing(submission("apartment", "Lekki", 4), &seller("s1", "Sam"))
            .unwrap();

        let all = store.search(&ListingQuery::default()).unwrap();
        assert_eq!(all.len(), 3);

        let buy = store
            .search(&ListingQuery {
                q: None,
                category: Some(Category::BuyProperty),
            })
            .unwrap();
        assert_eq!(buy.len(), 2);

        let rent = store
            .search(&ListingQuery {
                q: None,
                category: Some(Category::RentApartment),
            })
            .unwrap();
        assert_eq!(rent.len(), 1);

        let lekki = store
            .search(&ListingQuery {
                q: Some("LEKKI".to_string()),
                category: None,
            })
            .unwrap();
        assert_eq!(lekki.len(), 1);
        assert_eq!(lekki[0].location, "Lekki Phase 1");

        let land_in_lekki = store
            .search(&ListingQuery {
                q: Some("lekki".to_string()),
                category: Some(Category::BuyLand),
            })
            .unwrap();
        assert!(land_in_lekki.is_empty());
    }

    #[test]
    fn stats_count_by_status() {
        let store = store();
        approve(&store, "house", "Ikoyi");
        store
            .add_listing(submission("land", "Epe", 4), &seller("s1", "Sam"))
            .unwrap();

        assert_eq!(
            store.stats().unwrap(),
            ListingStats {
                total_listings: 2,
                pending_approvals: 1,
                approved_properties: 1,
            }
        );
    }

    #[test]
    fn contact_label_depends_on_type() {
        let store = store();
        let flat = approve(&store, "Apartment", "Lekki");
        let plot = approve(&store, "land", "Epe");
        assert_eq!(flat.contact_label(), "Agent");
        assert_eq!(plot.contact_label(), "Owner");
    }

    #[test]
    fn persisted_json_uses_camel_case_keys() {
        let storage = Arc::new(MemoryStorage::new());
        let store = ListingStore::open(storage.clone(), ChangeBus::new()).unwrap();
        store
            .add_listing(submission("house", "Ikoyi", 4), &seller("s1", "Sam"))
            .unwrap();

        let raw = storage.get(PROPERTIES_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["propertyType"], "house");
        assert_eq!(json[0]["sellerName"], "Sam");
        assert_eq!(json[0]["status"], "pending");
        assert!(json[0]["createdAt"].is_string());
    }
}
