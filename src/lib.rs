pub mod compile;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use compile::{CompileState, SymbolCompiler, SymbolDerivation};
pub use config::Config;
pub use datasource::{CsvExecutionSource, ExecutionSource, MockExecutionSource, SourceError};
pub use db::{init_db, Repository};
pub use domain::{
    AccountId, AccountingMethod, Decimal, RealizedDisposal, Side, Symbol, TaxLot, Term,
    TradeExecution, TradeStamp, WashSaleLink, WashStatus,
};
pub use error::LedgerError;
