use crate::transfer::messages::{HostInfo, ResourcePoolInfo, UpdateInfo};

pub fn print_pool(pool: &ResourcePoolInfo) {
    println!("Id:          {}", pool.id);
    println!("Path:        {}", pool.path);
    println!("Entitlement: {}", pool.entitlement);
    println!("Allocation:  {}", pool.allocation);
    if !pool.children.is_empty() {
        println!("Children:");
        for child in &pool.children {
            println!("  {} ({})", child.path, child.id);
        }
    }
}

pub fn print_pool_list(pools: &[ResourcePoolInfo]) {
    println!("{:<40} {:<24} {}", "Path", "Entitlement", "Allocation");
    for pool in pools {
        println!(
            "{:<40} {:<24} {}",
            pool.path,
            pool.entitlement.to_string(),
            pool.allocation
        );
    }
}

pub fn print_update(update: &UpdateInfo) {
    println!("Id:        {}", update.id);
    println!("Job:       {}", update.job_id);
    println!("State:     {}", update.state);
    println!("Version:   {}", update.config_version);
    println!(
        "Progress:  {}/{} done, {} failed",
        update.instances_done, update.instances_total, update.instances_failed
    );
    if !update.instances_current.is_empty() {
        let current: Vec<String> = update
            .instances_current
            .iter()
            .map(|i| i.to_string())
            .collect();
        println!("Rolling:   {}", current.join(","));
    }
}

pub fn print_update_list(updates: &[UpdateInfo]) {
    println!(
        "{:<38} {:<16} {:>6} {:>6} {:>6}",
        "Update-Id", "State", "Done", "Failed", "Total"
    );
    for update in updates {
        println!(
            "{:<38} {:<16} {:>6} {:>6} {:>6}",
            update.id,
            update.state.to_string(),
            update.instances_done,
            update.instances_failed,
            update.instances_total
        );
    }
}

pub fn print_host_list(hosts: &[HostInfo]) {
    println!(
        "{:<24} {:<10} {:<28} {}",
        "Hostname", "Status", "Capacity", "Allocated"
    );
    for host in hosts {
        println!(
            "{:<24} {:<10} {:<28} {}",
            host.hostname,
            host.status.to_string(),
            host.capacity.to_string(),
            host.allocated
        );
    }
}
