use rowsync_core::{CoreError, PrimaryKey, Row, RowOperation, TableDescriptor};

pub const ITEMS_DDL: &str = "CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    qty INTEGER NOT NULL CHECK (qty >= 0)
)";

pub const LINE_ITEMS_DDL: &str = "CREATE TABLE IF NOT EXISTS line_items (
    order_id TEXT NOT NULL,
    line INTEGER NOT NULL,
    sku TEXT NOT NULL,
    price REAL,
    PRIMARY KEY (order_id, line)
)";

pub fn items() -> Result<TableDescriptor, CoreError> {
    TableDescriptor::new("items", &["id"], &["name", "qty"])
}

pub fn line_items() -> Result<TableDescriptor, CoreError> {
    TableDescriptor::new("line_items", &["order_id", "line"], &["sku", "price"])
}

pub fn item(operation: RowOperation, id: i64, name: &str, qty: i64) -> Row {
    Row::new(operation)
        .with("id", id)
        .with("name", name)
        .with("qty", qty)
}

pub fn item_key(id: i64) -> PrimaryKey {
    PrimaryKey::new(vec![id.into()])
}
