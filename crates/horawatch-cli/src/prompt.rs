//! Operator-facing terminal prompts.
//!
//! The audience is the person booking a Chilean driver's license renewal, so
//! the interactive surface speaks Spanish; logs stay in English.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::ValueEnum;

use horawatch::{ManualChoice, MenuChoice, OperatorPrompt, Outcome, RunMode, Rut, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperationKind {
    /// Book a new appointment
    Crear,
    /// Move an existing appointment
    Modificar,
}

impl OperationKind {
    pub fn describe(&self) -> &'static str {
        match self {
            OperationKind::Crear => "crear nueva cita",
            OperationKind::Modificar => "modificar hora existente",
        }
    }
}

pub fn print_banner() {
    println!("{}", "=".repeat(70));
    println!("🚗 HORAWATCH - RESERVA DE HORAS DE LICENCIA DE CONDUCIR 🚗");
    println!("{}", "=".repeat(70));
}

fn read_line() -> Result<String> {
    let mut buffer = String::new();
    io::stdout().flush().ok();
    io::stdin()
        .read_line(&mut buffer)
        .context("no se pudo leer la entrada")?;
    Ok(buffer.trim().to_string())
}

/// Ask for a RUT until a valid one is entered.
pub fn ask_rut(example: &str) -> Result<Rut> {
    loop {
        println!("\n📝 Ingrese su RUT (formato: 12345678-9):");
        print!("RUT: ");
        let raw = read_line()?;

        if raw.is_empty() {
            println!("❌ Debe ingresar un RUT");
            continue;
        }

        match Rut::parse(&raw) {
            Ok(rut) => {
                println!("✅ RUT válido: {rut}");
                return Ok(rut);
            }
            Err(_) => {
                println!("❌ RUT inválido. Formato correcto: 12345678-9");
                println!("   Ejemplo: {example}");
            }
        }
    }
}

pub fn ask_operation() -> Result<OperationKind> {
    loop {
        println!("\n🔧 ¿Qué operación desea realizar?");
        println!("1. 🆕 Crear nueva cita");
        println!("2. ✏️  Modificar hora existente");
        print!("\nSeleccione una opción (1 o 2): ");

        match read_line()?.as_str() {
            "1" => {
                println!("✅ Operación seleccionada: Crear nueva cita");
                return Ok(OperationKind::Crear);
            }
            "2" => {
                println!("✅ Operación seleccionada: Modificar hora existente");
                return Ok(OperationKind::Modificar);
            }
            _ => println!("❌ Opción inválida. Seleccione 1 o 2"),
        }
    }
}

pub fn ask_mode() -> Result<RunMode> {
    loop {
        println!("\n¿Cómo desea ejecutar el monitoreo?");
        println!("1. 🔍 Verificación única");
        println!("2. 🔄 Monitoreo continuo");
        print!("\nSeleccione una opción (1 o 2): ");

        match read_line()?.as_str() {
            "1" => return Ok(RunMode::SingleCheck),
            "2" => return Ok(RunMode::Continuous),
            _ => println!("❌ Opción inválida. Seleccione 1 o 2"),
        }
    }
}

pub fn print_final_outcome(outcome: &Outcome) {
    println!("\n📊 RESULTADO FINAL:");
    let (icon, label) = match &outcome.verdict {
        Verdict::Available { .. } => ("🎉", "¡CITAS DISPONIBLES!"),
        Verdict::Unavailable { .. } => ("❌", "Sin citas disponibles"),
        Verdict::Error { .. } => ("🚨", "Error en la página"),
        Verdict::Uncertain => ("⚠️", "Estado incierto"),
    };
    println!("   {icon} {label}");
    println!("   • Detalle: {}", outcome.message);
    println!("   • URL: {}", outcome.url);
    println!("   • Observado: {}", outcome.observed_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

fn print_outcome_details(outcome: &Outcome) {
    println!("\n{}", "=".repeat(60));
    println!("🚨 RESULTADO DETECTADO");
    println!("{}", "=".repeat(60));
    println!("📝 Mensaje: {}", outcome.message);
    println!("🔗 URL actual: {}", outcome.url);
    if let Verdict::Error { raw_messages, .. } = &outcome.verdict {
        for (i, raw) in raw_messages.iter().enumerate() {
            println!("   {}. {}", i + 1, raw);
        }
    }
    println!("{}", "=".repeat(60));
}

/// Stdin-driven implementation of the single-check decision surface.
pub struct StdinPrompt;

impl OperatorPrompt for StdinPrompt {
    fn outcome_menu(&self, outcome: &Outcome) -> MenuChoice {
        print_outcome_details(outcome);
        println!("🔍 El navegador se mantiene abierto para inspección manual");

        loop {
            println!("\n🤔 ¿Qué desea hacer?");
            println!("1. 🔄 Continuar monitoreo (ignorar)");
            println!("2. ♻️  Reintentar desde el inicio");
            println!("3. 🖱️  Pausa para intervención manual");
            println!("4. ❌ Salir del programa");
            print!("\nSeleccione una opción (1-4): ");

            match read_line().unwrap_or_default().as_str() {
                "1" => return MenuChoice::ContinueIgnoring,
                "2" => return MenuChoice::RetryFromScratch,
                "3" => return MenuChoice::ManualIntervention,
                "4" => return MenuChoice::Stop,
                _ => println!("❌ Opción inválida. Seleccione 1, 2, 3 o 4"),
            }
        }
    }

    fn manual_menu(&self) -> ManualChoice {
        println!("\n{}", "=".repeat(60));
        println!("🖱️  MODO INTERVENCIÓN MANUAL");
        println!("{}", "=".repeat(60));
        println!("🔧 El navegador está disponible: puede hacer clic, navegar y llenar formularios.");

        loop {
            println!("\n🔍 ¿Qué desea hacer después de la intervención manual?");
            println!("1. ✅ Continuar desde el estado actual");
            println!("2. 🔄 Reiniciar completamente");
            println!("3. ⏸️  Mantener pausa (seguir interviniendo)");
            println!("4. ❌ Salir del programa");
            print!("\nSeleccione una opción (1-4): ");

            match read_line().unwrap_or_default().as_str() {
                "1" => return ManualChoice::ContinueFromCurrent,
                "2" => return ManualChoice::Restart,
                "3" => {
                    print!("⏸️  Presione ENTER cuando termine su intervención...");
                    let _ = read_line();
                    return ManualChoice::KeepPausing;
                }
                "4" => return ManualChoice::Stop,
                _ => println!("❌ Opción inválida. Seleccione 1, 2, 3 o 4"),
            }
        }
    }
}
