//! `aiq skills`: inspect installed skills.

use aiq_config::AppConfig;
use aiq_skills::SkillsManager;

pub fn list() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let dir = config.skills_dir();
    let manager = SkillsManager::from_dir(&dir);
    let skills = manager.list_metadata();

    if skills.is_empty() {
        println!("No skills found in {}", dir.display());
        return Ok(());
    }

    let width = skills.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for skill in &skills {
        println!("  {:width$}  {}", skill.name, skill.description);
    }
    println!();
    println!("{} skill(s) in {}", skills.len(), dir.display());
    Ok(())
}

pub fn show(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let manager = SkillsManager::from_dir(&config.skills_dir());
    let skill = manager.load(name)?;

    println!("# {}", skill.name);
    println!();
    println!("{}", skill.description);
    println!();
    println!("{}", skill.content);
    Ok(())
}
