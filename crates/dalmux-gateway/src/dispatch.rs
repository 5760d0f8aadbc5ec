//! Executes one protocol request against an `EntityConnection`
//!
//! Shared by the remote and HTTP servers so both transports rebuild value
//! trees and shape responses identically.

use std::sync::Arc;

use dalmux_core::codec::{
    entities_from_trees, entity_trees, keys_from_trees, key_trees, resolve_attribute, value_trees,
    values_from_trees, ValueTree,
};
use dalmux_core::protocol::{EntityRequest, EntityResponse};
use dalmux_core::{EntityConnection, Result};

/// Run `request` on `connection`.
///
/// `Disconnect` only acknowledges; ending the session is up to the caller.
pub async fn dispatch(
    connection: &mut dyn EntityConnection,
    request: EntityRequest,
) -> Result<EntityResponse> {
    let domain = Arc::clone(connection.domain());

    let response = match request {
        EntityRequest::Ping | EntityRequest::Disconnect => EntityResponse::Unit,
        EntityRequest::IsTransactionOpen => {
            EntityResponse::Boolean(connection.is_transaction_open().await?)
        }
        EntityRequest::BeginTransaction => {
            connection.begin_transaction().await?;
            EntityResponse::Unit
        }
        EntityRequest::CommitTransaction => {
            connection.commit_transaction().await?;
            EntityResponse::Unit
        }
        EntityRequest::RollbackTransaction => {
            connection.rollback_transaction().await?;
            EntityResponse::Unit
        }
        EntityRequest::Insert { entities } => {
            let entities = entities_from_trees(entities, &domain)?;
            let keys = connection.insert_all(&entities).await?;
            EntityResponse::Keys(key_trees(&keys))
        }
        EntityRequest::Update { entities } => {
            let entities = entities_from_trees(entities, &domain)?;
            let updated = connection.update_all(&entities).await?;
            EntityResponse::Entities(entity_trees(&updated))
        }
        EntityRequest::Delete { keys } => {
            let keys = keys_from_trees(keys, &domain)?;
            connection.delete_all(&keys).await?;
            EntityResponse::Unit
        }
        EntityRequest::DeleteWhere { condition } => {
            let condition = condition.into_condition(&domain)?;
            EntityResponse::Count(connection.delete_where(&condition).await?)
        }
        EntityRequest::Select { select } => {
            let select = select.into_select(&domain)?;
            let entities = connection.query(&select).await?;
            EntityResponse::Entities(entity_trees(&entities))
        }
        EntityRequest::Count { condition } => {
            let condition = condition.into_condition(&domain)?;
            EntityResponse::Count(connection.count(&condition).await?)
        }
        EntityRequest::SelectValues {
            attribute,
            condition,
        } => {
            resolve_attribute(&domain, &attribute)?;
            let condition = condition.into_condition(&domain)?;
            let values = connection.select_values(&attribute, &condition).await?;
            EntityResponse::Values(value_trees(&values))
        }
        EntityRequest::ExecuteFunction {
            function_id,
            arguments,
        } => {
            let arguments = values_from_trees(arguments, &domain)?;
            let value = connection.execute_function(&function_id, &arguments).await?;
            EntityResponse::Value(ValueTree::from(&value))
        }
        EntityRequest::ExecuteProcedure {
            procedure_id,
            arguments,
        } => {
            let arguments = values_from_trees(arguments, &domain)?;
            connection.execute_procedure(&procedure_id, &arguments).await?;
            EntityResponse::Unit
        }
        EntityRequest::FillReport {
            report_id,
            parameters,
        } => {
            let parameters = values_from_trees(parameters, &domain)?;
            let value = connection.fill_report(&report_id, &parameters).await?;
            EntityResponse::Value(ValueTree::from(&value))
        }
    };

    Ok(response)
}
