/*!
# Soma DevKit

Kit de développement pour composants Soma.

Fournit :
- Un client MQTT simulé pour tester un composant sans broker
- Des builders pour les messages du bus (announce, sample, ack...)
- Un capteur simulé scriptable pour éprouver la boucle d'adaptation

Aucune dépendance vers le hub : tout passe par les contrats JSON
publiés sur le bus, comme pour un vrai composant.
*/

pub mod messages;
pub mod mqtt_stub;
pub mod sensor_sim;

pub use messages::SomaMessageBuilder;
pub use mqtt_stub::MockMqttClient;
pub use sensor_sim::SensorSim;
