//! # Checkout Flow Demo
//!
//! A checkout saga that reserves stock in a forked task, races the payment
//! gateway against a timeout, then joins the reservation and confirms.

use std::time::Duration;

use anyhow::Result;
use saga_core::{
    from_fn, Callback, CallbackFunction, Effect, Engine, Event, Function, Pattern, ProcError,
    Resume, Routine, Step, TaskHandle, Value,
};
use serde_json::json;

const PAYMENT_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Inventory (callback-style warehouse client)
// ============================================================================

fn warehouse() -> CallbackFunction {
    CallbackFunction::new("warehouse.reserve", |args, callback: Callback| {
        let order_id = args.first().and_then(Value::as_str).unwrap_or("?").to_string();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            callback.ok(json!({ "order": order_id, "sku": "BOOK-42", "qty": 1 }));
        });
        Ok(())
    })
}

fn reserve_inventory() -> Function {
    Function::generator("reserve_inventory", |args: Vec<Value>| {
        let mut args = Some(args);
        from_fn(move |resume| match (resume, args.take()) {
            (Resume::Value(_), Some(args)) => Ok(Step::Yield(Effect::cps(warehouse(), args))),
            (Resume::Value(reservation), None) => Ok(Step::Done(reservation)),
            (Resume::Error(error), _) => Err(error),
        })
    })
}

// ============================================================================
// Checkout saga
// ============================================================================

enum Stage {
    Start(String),
    Reserving,
    AwaitingPayment(TaskHandle),
    Joining,
    Finishing(Value),
    Closed,
}

fn payment_or_timeout() -> Effect {
    Effect::race([
        (
            "payment",
            Effect::wait(Pattern::one_of(["payment.succeeded", "payment.declined"])),
        ),
        (
            "timeout",
            Effect::future(async {
                tokio::time::sleep(PAYMENT_TIMEOUT).await;
                Ok(Value::Unit)
            }),
        ),
    ])
}

fn checkout_saga(order_id: String) -> impl Routine {
    let mut stage = Stage::Start(order_id);

    from_fn(move |resume| {
        let input = match resume {
            Resume::Value(value) => value,
            Resume::Error(error) => return Err(error),
        };

        match std::mem::replace(&mut stage, Stage::Closed) {
            Stage::Start(order_id) => {
                stage = Stage::Reserving;
                Ok(Step::Yield(Effect::fork(
                    reserve_inventory(),
                    vec![Value::from(order_id)],
                )))
            }
            Stage::Reserving => {
                let task = input.into_task().ok_or(ProcError::NotAdvanceable)?;
                stage = Stage::AwaitingPayment(task);
                Ok(Step::Yield(payment_or_timeout()))
            }
            Stage::AwaitingPayment(task) => {
                let paid = input
                    .get("payment")
                    .and_then(Value::as_event)
                    .is_some_and(|event| event.kind == "payment.succeeded");
                if paid {
                    stage = Stage::Joining;
                    Ok(Step::Yield(Effect::join(task)))
                } else {
                    let reason = if input.get("timeout").is_some() {
                        "timeout"
                    } else {
                        "declined"
                    };
                    stage = Stage::Finishing(Value::from(reason));
                    Ok(Step::Yield(Effect::emit(Event::with_payload(
                        "order.cancelled",
                        json!({ "reason": reason }),
                    ))))
                }
            }
            Stage::Joining => {
                let payload = input.as_data().cloned().unwrap_or_default();
                stage = Stage::Finishing(input);
                Ok(Step::Yield(Effect::emit(Event::with_payload(
                    "order.confirmed",
                    payload,
                ))))
            }
            Stage::Finishing(outcome) => Ok(Step::Done(outcome)),
            Stage::Closed => Err(ProcError::NotAdvanceable),
        }
    })
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Checkout Flow Demo ===\n");

    let local = tokio::task::LocalSet::new();
    local.run_until(run_demo()).await
}

async fn run_demo() -> Result<()> {
    let engine = Engine::builder()
        .name("checkout")
        .with_tap(|event: &Event| println!("  event: {event}"))
        .build();

    let checkout = Function::generator("checkout", |args: Vec<Value>| {
        let order_id = args.first().and_then(Value::as_str).unwrap_or("unknown");
        checkout_saga(order_id.to_string())
    });

    // Paid order
    println!("Order 17: customer pays");
    let task = engine
        .run_saga(&checkout, vec![Value::from("order-17")])
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let gateway = engine.bus().clone();
    tokio::task::spawn_local(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        gateway.dispatch(Event::with_payload("payment.succeeded", json!({ "amount": 1999 })));
    });

    let outcome = task
        .completion()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    println!("  outcome: {outcome}\n");

    // Abandoned order
    println!("Order 18: customer walks away");
    let task = engine
        .run_saga(&checkout, vec![Value::from("order-18")])
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let outcome = task
        .completion()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    println!("  outcome: {outcome}");
    println!("  listeners left: {}", engine.subscriber_count());

    Ok(())
}
