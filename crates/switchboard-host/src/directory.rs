//! Read-only customer data behind the built-in tools.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use switchboard_core::tools::HandlerError;

use crate::error::DirectoryError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub tier: String,
    pub since: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub placed_at: DateTime<Utc>,
    pub status: String,
    pub total: f64,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub customer_id: String,
    pub subject: String,
    pub status: TicketStatus,
    pub opened_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Pending,
    Closed,
}

/// Ticket status filter; `All` matches everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketFilter {
    Only(TicketStatus),
    All,
}

impl TicketFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Only(TicketStatus::Open)),
            "pending" => Some(Self::Only(TicketStatus::Pending)),
            "closed" => Some(Self::Only(TicketStatus::Closed)),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn matches(self, status: TicketStatus) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => wanted == status,
        }
    }
}

/// Lookup surface used by the business tools. Implementations must not
/// hand out mutable state; every call is independent.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, HandlerError>;

    /// Orders for a customer, newest first, at most `limit`.
    async fn orders(&self, customer_id: &str, limit: usize) -> Result<Vec<Order>, HandlerError>;

    /// Sum of every order total for a customer.
    async fn lifetime_value(&self, customer_id: &str) -> Result<f64, HandlerError>;

    async fn tickets(&self, customer_id: &str, filter: TicketFilter) -> Result<Vec<Ticket>, HandlerError>;
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InMemoryDirectory {
    #[serde(default)]
    customers: Vec<Customer>,
    #[serde(default)]
    orders: Vec<Order>,
    #[serde(default)]
    tickets: Vec<Ticket>,
}

impl InMemoryDirectory {
    /// Parse a fixture of the form `{customers: [...], orders: [...], tickets: [...]}`.
    pub fn from_json(json: &str) -> Result<Self, DirectoryError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let contents = std::fs::read_to_string(path)?;
        let directory = Self::from_json(&contents)?;
        tracing::info!(
            path = %path.display(),
            customers = directory.customers.len(),
            orders = directory.orders.len(),
            tickets = directory.tickets.len(),
            "loaded customer directory"
        );
        Ok(directory)
    }

    /// Small fixed data set for development.
    pub fn demo() -> Self {
        Self {
            customers: vec![
                customer("cus_001", "Jane Cooper", "jane@example.com", "gold", at(2021, 3, 14)),
                customer("cus_002", "Omar Haddad", "omar@example.com", "standard", at(2023, 9, 2)),
            ],
            orders: vec![
                order("ord_1001", "cus_001", at(2024, 1, 10), "delivered", 129.99, &["Trail runners"]),
                order("ord_1002", "cus_001", at(2024, 4, 22), "delivered", 45.5, &["Socks (3 pack)", "Insoles"]),
                order("ord_1003", "cus_001", at(2024, 6, 3), "shipped", 310.0, &["Rain shell"]),
                order("ord_2001", "cus_002", at(2024, 5, 18), "processing", 18.75, &["Water bottle"]),
            ],
            tickets: vec![
                ticket("tkt_501", "cus_001", "Rain shell arrived damaged", TicketStatus::Open, at(2024, 6, 7)),
                ticket("tkt_502", "cus_001", "Update billing address", TicketStatus::Closed, at(2024, 2, 1)),
                ticket("tkt_601", "cus_002", "Where is my order?", TicketStatus::Pending, at(2024, 5, 25)),
            ],
        }
    }
}

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

fn customer(id: &str, name: &str, email: &str, tier: &str, since: DateTime<Utc>) -> Customer {
    Customer {
        id: id.into(),
        name: name.into(),
        email: email.into(),
        tier: tier.into(),
        since,
    }
}

fn order(id: &str, customer_id: &str, placed_at: DateTime<Utc>, status: &str, total: f64, items: &[&str]) -> Order {
    Order {
        id: id.into(),
        customer_id: customer_id.into(),
        placed_at,
        status: status.into(),
        total,
        items: items.iter().map(|s| s.to_string()).collect(),
    }
}

fn ticket(id: &str, customer_id: &str, subject: &str, status: TicketStatus, opened_at: DateTime<Utc>) -> Ticket {
    Ticket {
        id: id.into(),
        customer_id: customer_id.into(),
        subject: subject.into(),
        status,
        opened_at,
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, HandlerError> {
        Ok(self
            .customers
            .iter()
            .find(|c| c.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn orders(&self, customer_id: &str, limit: usize) -> Result<Vec<Order>, HandlerError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        orders.truncate(limit);
        Ok(orders)
    }

    async fn lifetime_value(&self, customer_id: &str) -> Result<f64, HandlerError> {
        let total: f64 = self
            .orders
            .iter()
            .filter(|o| o.customer_id == customer_id)
            .map(|o| o.total)
            .sum();
        Ok((total * 100.0).round() / 100.0)
    }

    async fn tickets(&self, customer_id: &str, filter: TicketFilter) -> Result<Vec<Ticket>, HandlerError> {
        let mut tickets: Vec<Ticket> = self
            .tickets
            .iter()
            .filter(|t| t.customer_id == customer_id && filter.matches(t.status))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn email_lookup_ignores_case() {
        let dir = InMemoryDirectory::demo();
        let jane = dir.find_by_email("Jane@Example.com").await.unwrap().unwrap();
        assert_eq!(jane.id, "cus_001");
        assert!(dir.find_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn orders_newest_first_and_limited() {
        let dir = InMemoryDirectory::demo();
        let orders = dir.orders("cus_001", 2).await.unwrap();
        let ids: Vec<_> = orders.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["ord_1003", "ord_1002"]);
        assert_eq!(dir.lifetime_value("cus_001").await.unwrap(), 485.49);
    }

    #[tokio::test]
    async fn ticket_filter() {
        let dir = InMemoryDirectory::demo();
        let open = dir.tickets("cus_001", TicketFilter::Only(TicketStatus::Open)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "tkt_501");
        let all = dir.tickets("cus_001", TicketFilter::All).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(TicketFilter::parse("bogus"), None);
    }

    #[tokio::test]
    async fn loads_fixture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "customers": [{{"id": "c1", "name": "Ada", "email": "ada@example.com",
                                "tier": "gold", "since": "2020-01-01T00:00:00Z"}}],
                "orders": [{{"id": "o1", "customerId": "c1", "placedAt": "2024-01-01T00:00:00Z",
                             "status": "delivered", "total": 10.0}}]
            }}"#
        )
        .unwrap();

        let dir = InMemoryDirectory::load(file.path()).unwrap();
        assert!(dir.find_by_email("ada@example.com").await.unwrap().is_some());
        assert_eq!(dir.orders("c1", 10).await.unwrap().len(), 1);
        assert!(dir.tickets("c1", TicketFilter::All).await.unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_fixture() {
        assert!(matches!(
            InMemoryDirectory::from_json("{\"customers\": 3}"),
            Err(DirectoryError::Json(_))
        ));
    }
}
