use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Stationery Storefront API

Catalog browsing, a session cart, checkout into orders, customer accounts and a
multi-warehouse stock ledger.

## Sessions

Cart state and login live in a server-side session identified by the `sessionid`
cookie. Endpoints that change the session answer with `Set-Cookie`; send the cookie
back on later requests.

## Staff endpoints

Everything under `/api/v1/admin` requires a logged-in staff account.

## Error Handling

```json
{
  "error": "Bad Request",
  "message": "Validation failed: phone",
  "errors": [{"field": "phone", "message": "This field is required"}],
  "request_id": "req-abc123",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "catalog", description = "Products and categories"),
        (name = "cart", description = "Session cart"),
        (name = "checkout", description = "Order placement"),
        (name = "accounts", description = "Registration, login and order history"),
        (name = "warehouses", description = "Warehouse stock ledger"),
        (name = "admin", description = "Staff-only mutations")
    ),
    paths(
        crate::handlers::catalog::list_products,
        crate::handlers::catalog::get_product,
        crate::handlers::catalog::product_availability,
        crate::handlers::catalog::list_categories,
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_item,
        crate::handlers::cart::set_quantity,
        crate::handlers::cart::remove_item,
        crate::handlers::checkout::preview_checkout,
        crate::handlers::checkout::place_order,
        crate::handlers::accounts::register,
        crate::handlers::accounts::login,
        crate::handlers::accounts::logout,
        crate::handlers::accounts::get_profile,
        crate::handlers::accounts::update_profile,
        crate::handlers::accounts::order_history,
        crate::handlers::accounts::order_detail,
        crate::handlers::warehouses::list_warehouses,
        crate::handlers::warehouses::get_warehouse,
        crate::handlers::warehouses::warehouse_statistics,
        crate::handlers::warehouses::list_movements,
        crate::handlers::admin::create_category,
        crate::handlers::admin::delete_category,
        crate::handlers::admin::create_product,
        crate::handlers::admin::create_warehouse,
        crate::handlers::admin::set_warehouse_active,
        crate::handlers::admin::record_movement,
        crate::handlers::admin::transfer_stock,
        crate::handlers::admin::record_count,
        crate::handlers::admin::update_order_status,
        crate::handlers::admin::assign_order_warehouse,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::handlers::cart::SetQuantityRequest,
            crate::services::checkout::CheckoutInput,
            crate::services::accounts::RegisterInput,
            crate::services::accounts::LoginInput,
            crate::services::accounts::UpdateProfileInput,
            crate::services::catalog::CreateCategoryInput,
            crate::services::catalog::CreateProductInput,
            crate::services::warehouse::CreateWarehouseInput,
            crate::services::warehouse::RecordMovementInput,
            crate::services::warehouse::TransferInput,
            crate::services::warehouse::StockCountInput,
            crate::handlers::admin::UpdateStatusRequest,
            crate::handlers::admin::AssignWarehouseRequest,
            crate::handlers::admin::SetActiveRequest,
            crate::handlers::admin::MovementRecorded,
            crate::models::StockChange,
            crate::models::StockStatus,
            crate::entities::OrderStatus,
            crate::entities::MovementType,
            crate::errors::FieldError,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
