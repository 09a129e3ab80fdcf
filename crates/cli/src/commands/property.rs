//! Property registry commands.

use anyhow::Result;

use common::{PropertyRecord, RegisterPropertyRequest, RegisterPropertyResponse};

use crate::client::RegistryClient;

fn print_property(property: &PropertyRecord) {
    println!("  ID:         {}", property.property_id);
    println!("  Owner:      {}", property.owner);
    println!("  Location:   {}", property.location);
    println!("  Area:       {} sqm", property.area_sqm);
    println!("  Status:     {}", property.status.as_str());
    println!("  Registered: {}", property.registered_at.to_rfc3339());
    if let Some(at) = property.last_transfer_at {
        println!("  Last transfer: {}", at.to_rfc3339());
    }
}

/// Register a new property.
pub async fn register_property(
    client: &RegistryClient,
    id: &str,
    location: &str,
    area: u64,
) -> Result<()> {
    let request = RegisterPropertyRequest {
        property_id: id.to_string(),
        location: location.to_string(),
        area_sqm: area,
    };

    let response: RegisterPropertyResponse = client.post("/property", &request).await?;

    println!("Property Registered");
    println!("===================");
    print_property(&response.property);
    match response.ledger_tx_ref {
        Some(tx_ref) => println!("  Ledger tx:  {}", tx_ref),
        None => println!("  Ledger tx:  (pending, not yet confirmed)"),
    }

    Ok(())
}

/// List all registered properties.
pub async fn list_properties(client: &RegistryClient) -> Result<()> {
    let properties: Vec<PropertyRecord> = client.get("/properties").await?;

    println!("Registered Properties");
    println!("=====================");

    if properties.is_empty() {
        println!("  No properties found.");
        println!();
        println!("Register your first property with:");
        println!("  landreg property register --id LOT-1 --location \"...\" --area 500");
    } else {
        for property in &properties {
            println!();
            print_property(property);
        }
        println!();
        println!("Total: {} propert{}", properties.len(), if properties.len() == 1 { "y" } else { "ies" });
    }

    Ok(())
}

/// Show a single property.
pub async fn show_property(client: &RegistryClient, id: &str) -> Result<()> {
    let property: PropertyRecord = client.get(&format!("/property/{}", id)).await?;

    println!("Property Details");
    println!("================");
    print_property(&property);

    Ok(())
}
