use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use chrono::Utc;
use job_domain::{JobId, SearchRequest, SearchSpec, SortSpec, StatusValue, SummaryRequest};
use job_manager::{JobManager, ManagerConfig, StatusChange, UserInfo, NORMAL_USER};

/// Pequeño menú interactivo sobre el seguimiento de jobs, usando el store
/// de `job-persistence` (SQLite por defecto, Postgres con la feature `pg`).
///
/// La identidad del llamador sale de `JOBMON_USER`, `JOBMON_VO`,
/// `JOBMON_GROUP` y `JOBMON_PROPERTIES` (separadas por comas).
///
/// Opciones soportadas:
/// 1) Enviar job
/// 2) Ver estado de un job
/// 3) Cambiar estado de un job
/// 4) Ver historial
/// 5) Buscar jobs (tabla)
/// 6) Resumen por estado
/// 7) Borrar historial
/// 8) Salir
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Inicializar store (aplica migraciones embebidas si procede)
    let store = job_persistence::new_from_env()?;
    let manager = JobManager::new(Arc::new(store), ManagerConfig::from_env()?)?;
    let user = user_from_env();
    println!("Sesión como {}/{} ({})", user.sub, user.vo, user.group);

    loop {
        println!("\n== Job CLI menu ==");
        println!("1) Enviar job");
        println!("2) Ver estado de un job");
        println!("3) Cambiar estado de un job");
        println!("4) Ver historial");
        println!("5) Buscar jobs (tabla)");
        println!("6) Resumen por estado");
        println!("7) Borrar historial");
        println!("8) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        io::stdin().read_line(&mut choice)?;
        match choice.trim() {
            "1" => {
                let description = prompt("Descripción del job (JDL en una línea): ")?;
                match manager.submit_jobs(&user, &[description.trim().to_string()]) {
                    Ok(items) => {
                        for item in items {
                            match item {
                                Ok(job) => println!("Job creado: {} ({} / {})", job.job_id, job.status, job.minor_status),
                                Err(e) => eprintln!("Error creando job: {}", e.message),
                            }
                        }
                    }
                    Err(e) => eprintln!("Error enviando job: {}", e),
                }
            }
            "2" => {
                let Some(job_id) = prompt_job_id()? else { continue };
                match manager.get_job_status(&user, job_id) {
                    Ok(st) => println!("{}: {} / {} / {}", job_id, st.status, st.minor_status, st.application_status),
                    Err(e) => eprintln!("Error leyendo estado: {}", e),
                }
            }
            "3" => {
                let Some(job_id) = prompt_job_id()? else { continue };
                let status = prompt("Estado (enter = sin cambio): ")?;
                let minor = prompt("Estado menor (enter = sin cambio): ")?;
                let application = prompt("Estado de la aplicación (enter = sin cambio): ")?;
                let source = prompt("Fuente (enter = Unknown): ")?;
                let force = prompt("¿Forzar sin validar la transición? escribir 'yes': ")?;
                let mut change = StatusChange::new().status(optional(&status))
                                                    .minor_status(optional(&minor))
                                                    .application_status(optional(&application));
                if !source.trim().is_empty() {
                    change = change.source(source.trim());
                }
                let force = force.trim().eq_ignore_ascii_case("yes");
                match manager.set_job_status(&user, job_id, change, Some(Utc::now()), force) {
                    Ok(out) if out.discarded > 0 => println!("Actualización descartada por atrasada"),
                    Ok(out) => {
                        if let Some(st) = out.status {
                            println!("{}: {} / {} / {}", job_id, st.status, st.minor_status, st.application_status);
                        }
                    }
                    Err(e) if e.is_retryable() => eprintln!("Error cambiando estado (se puede reintentar): {}", e),
                    Err(e) => eprintln!("Error cambiando estado: {}", e),
                }
            }
            "4" => {
                let Some(job_id) = prompt_job_id()? else { continue };
                match manager.get_job_history(&user, job_id) {
                    Ok(history) => {
                        println!("\nTIME                             | STATUS       | MINOR                    | APP                  | SOURCE");
                        println!("--------------------------------------------------------------------------------------------------------------");
                        for h in history {
                            println!("{:<32} | {:<12} | {:<24} | {:<20} | {}",
                                     h.status_time.to_rfc3339(),
                                     h.status,
                                     h.minor_status,
                                     h.application_status,
                                     h.status_source);
                        }
                    }
                    Err(e) => eprintln!("Error leyendo historial: {}", e),
                }
            }
            "5" => {
                let status = prompt("Filtrar por estado (enter para todos): ")?;
                let mut request = SearchRequest { parameters: Some(vec!["JobID".into(),
                                                                        "Owner".into(),
                                                                        "Status".into(),
                                                                        "MinorStatus".into()]),
                                                  search: Vec::new(),
                                                  sort: vec![SortSpec::new("JobID", "asc")] };
                if !status.trim().is_empty() {
                    request.search.push(SearchSpec::scalar("Status", "eq", status.trim()));
                }
                match manager.search(&user, &request, None, 100) {
                    Ok(rows) => {
                        println!("\nJOB ID | OWNER        | STATUS       | MINOR");
                        println!("------------------------------------------------------------");
                        for row in rows {
                            let cell = |k: &str| row.get(k).map(|v| serde_json::to_string(v).unwrap_or_default()).unwrap_or_default();
                            println!("{:<6} | {:<12} | {:<12} | {}", cell("JobID"), cell("Owner"), cell("Status"), cell("MinorStatus"));
                        }
                    }
                    Err(e) => eprintln!("Error buscando jobs: {}", e),
                }
            }
            "6" => {
                let request = SummaryRequest { grouping: vec!["Status".into()], search: Vec::new() };
                match manager.summary(&user, &request) {
                    Ok(groups) => {
                        for g in groups {
                            println!("{}", serde_json::to_string(&g)?);
                        }
                    }
                    Err(e) => eprintln!("Error calculando resumen: {}", e),
                }
            }
            "7" => {
                let Some(job_id) = prompt_job_id()? else { continue };
                let confirm = prompt(&format!("Confirma borrado del historial de {}? escribir 'yes' para confirmar: ", job_id))?;
                if confirm.trim().to_lowercase() == "yes" {
                    match manager.delete_job_history(&user, &[job_id]) {
                        Ok(()) => println!("Historial eliminado: {}", job_id),
                        Err(e) => eprintln!("Error eliminando historial: {}", e),
                    }
                } else {
                    println!("Borrado cancelado");
                }
            }
            "8" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    Ok(())
}

fn user_from_env() -> UserInfo {
    let var = |k: &str, default: &str| std::env::var(k).unwrap_or_else(|_| default.to_string());
    let properties = var("JOBMON_PROPERTIES", NORMAL_USER);
    UserInfo::new(var("JOBMON_USER", "alice"),
                  var("JOBMON_VO", "lhcb"),
                  var("JOBMON_GROUP", "lhcb_user"),
                  properties.split(',').map(str::trim).filter(|p| !p.is_empty()))
}

fn optional(raw: &str) -> StatusValue {
    if raw.trim().is_empty() {
        StatusValue::Unchanged
    } else {
        StatusValue::value(raw.trim())
    }
}

fn prompt_job_id() -> io::Result<Option<JobId>> {
    let raw = prompt("Job id: ")?;
    match raw.trim().parse() {
        Ok(id) => Ok(Some(id)),
        Err(_) => {
            eprintln!("Job id inválido");
            Ok(None)
        }
    }
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
