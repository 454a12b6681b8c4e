//! Database access: connection traits, the bounded pool and the SeaORM backend

mod connection;
mod orm;
mod pool;

pub use connection::{Connection, Connector, QueryArg, Row, StoreError};
pub use orm::{SeaOrmConnection, SeaOrmConnector};
pub use pool::{Pool, PoolConfig, PoolError, PoolSize, PooledConnection};
