use crate::{
    errors::ServiceError,
    middleware_helpers::session::SessionContext,
    models::{Cart, CartLine, CartSnapshot, ProductId, QuantityInput},
    services::catalog::CatalogService,
    session::SessionManager,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// Result of an operation that persisted the session, with what the cookie needs to know.
#[derive(Debug, Clone)]
pub struct SessionWrite<T> {
    pub value: T,
    pub expire_at_browser_close: bool,
}

/// Cart line state after a mutation
#[derive(Debug, Clone, Serialize)]
pub struct CartUpdate {
    pub product_id: i32,
    /// Zero when the line was removed
    pub quantity: u32,
    pub item_count: u64,
}

/// Read view of the cart. Lines whose product disappeared are dropped and reported.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub total_price: Decimal,
    pub item_count: u64,
    pub removed_product_ids: Vec<i32>,
}

#[derive(Clone)]
pub struct CartService {
    sessions: SessionManager,
    catalog: CatalogService,
}

impl CartService {
    pub fn new(sessions: SessionManager, catalog: CatalogService) -> Self {
        Self { sessions, catalog }
    }

    /// Prices `cart` with a single product lookup. Any missing product fails the whole call.
    pub async fn snapshot_with_totals(&self, cart: &Cart) -> Result<CartSnapshot, ServiceError> {
        let products = self.catalog.products_by_ids(&cart.product_ids()).await?;
        cart.price(&products)
    }

    #[instrument(skip(self, session), fields(new_session = session.is_new))]
    pub async fn view(&self, session: &SessionContext) -> Result<CartView, ServiceError> {
        if session.is_new {
            return Ok(CartView {
                lines: Vec::new(),
                total_price: Decimal::ZERO,
                item_count: 0,
                removed_product_ids: Vec::new(),
            });
        }

        let _guard = self.sessions.lock(&session.key).await;
        let mut data = self.sessions.load(&session.key).await?;
        let products = self
            .catalog
            .products_by_ids(&data.cart.product_ids())
            .await?;
        let existing: HashSet<i32> = products.keys().copied().collect();
        let removed = data.cart.prune_missing(&existing);
        if !removed.is_empty() {
            info!(?removed, "Pruned cart lines for deleted products");
            self.sessions.save(&session.key, &data).await?;
        }

        let snapshot = data.cart.price(&products)?;
        Ok(CartView {
            lines: snapshot.lines,
            total_price: snapshot.total_price,
            item_count: snapshot.item_count,
            removed_product_ids: removed,
        })
    }

    /// Adds one unit. The product is not looked up; pricing catches stale ids later.
    #[instrument(skip(self, session))]
    pub async fn add(
        &self,
        session: &SessionContext,
        product_id: ProductId,
    ) -> Result<SessionWrite<CartUpdate>, ServiceError> {
        self.mutate(session, product_id, |cart| {
            cart.add(product_id);
        })
        .await
    }

    #[instrument(skip(self, session))]
    pub async fn set_quantity(
        &self,
        session: &SessionContext,
        product_id: ProductId,
        quantity: &QuantityInput,
    ) -> Result<SessionWrite<CartUpdate>, ServiceError> {
        let quantity = quantity.parse()?;
        self.mutate(session, product_id, |cart| {
            cart.set_quantity(product_id, quantity);
        })
        .await
    }

    #[instrument(skip(self, session))]
    pub async fn remove(
        &self,
        session: &SessionContext,
        product_id: ProductId,
    ) -> Result<SessionWrite<CartUpdate>, ServiceError> {
        self.mutate(session, product_id, |cart| {
            cart.remove(product_id);
        })
        .await
    }

    async fn mutate(
        &self,
        session: &SessionContext,
        product_id: ProductId,
        apply: impl FnOnce(&mut Cart),
    ) -> Result<SessionWrite<CartUpdate>, ServiceError> {
        let _guard = self.sessions.lock(&session.key).await;
        let mut data = self.sessions.load(&session.key).await?;
        apply(&mut data.cart);
        self.sessions.save(&session.key, &data).await?;

        let update = CartUpdate {
            product_id: product_id.value(),
            quantity: data.cart.quantity(product_id).unwrap_or(0),
            item_count: data.cart.item_count(),
        };
        debug!(?update, "Cart updated");
        Ok(SessionWrite {
            value: update,
            expire_at_browser_close: data.expire_at_browser_close,
        })
    }
}
